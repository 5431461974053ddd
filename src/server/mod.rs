//! HTTP surface for the sync workflow.
//!
//! # Endpoints
//!
//! - `GET /api/v1/sync` - Returns the current `SyncView` as JSON
//! - `POST /api/v1/sync/actions` - Applies a `UserAction` (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

pub mod health;
pub mod sync;

pub use health::health_handler;
pub use sync::{ServerError, action_handler, view_handler};

use crate::binding::Binding;
use crate::workflow::SyncSession;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. The session
/// lives as long as the last clone, so the workflow stops once the server
/// has shut down and dropped its router.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    session: SyncSession,
    binding: Binding,
}

impl AppState {
    pub fn new(session: SyncSession, binding: Binding) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { session, binding }),
        }
    }

    pub fn session(&self) -> &SyncSession {
        &self.inner.session
    }

    pub fn binding(&self) -> &Binding {
        &self.inner.binding
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/v1/sync", get(view_handler))
        .route("/api/v1/sync/actions", post(action_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
