//! Workflow endpoints: the current view, and operator actions.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, instrument};

use super::AppState;
use crate::binding::{ActionError, SyncView, UserAction};

/// Errors that can occur when handling an action.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The workflow actor has stopped and accepts no more events.
    #[error("sync workflow has terminated")]
    Terminated,

    /// The action names a commit that cannot be picked.
    #[error("{0}")]
    Action(#[from] ActionError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Terminated => StatusCode::CONFLICT,
            ServerError::Action(ActionError::NotMissing(_)) => StatusCode::NOT_FOUND,
        };

        (status, self.to_string()).into_response()
    }
}

/// Returns the current view as JSON.
pub async fn view_handler(State(app_state): State<AppState>) -> Json<SyncView> {
    let snapshot = app_state.session().snapshot();
    Json(app_state.binding().view(&snapshot))
}

/// Applies an operator action.
///
/// # Response
///
/// - 202 Accepted with the view after the action was processed. The action
///   may have been ignored if it does not apply to the current state.
/// - 404 Not Found if a pick names a commit that is not missing
/// - 409 Conflict if the workflow has terminated
///
/// # Example
///
/// ```ignore
/// POST /api/v1/sync/actions HTTP/1.1
/// Content-Type: application/json
///
/// {"action": "pick", "sha": "6dcb09b5b57875f334f61aebed695e2e4193db5e"}
///
/// HTTP/1.1 202 Accepted
/// Content-Type: application/json
///
/// {"view": "sync", "source": {...}, "target": {...}, "overlay": {"kind": "confirming", ...}}
/// ```
#[instrument(skip(app_state))]
pub async fn action_handler(
    State(app_state): State<AppState>,
    Json(action): Json<UserAction>,
) -> Result<(StatusCode, Json<SyncView>), ServerError> {
    let actor = app_state.session().actor();
    if actor.is_terminated() {
        return Err(ServerError::Terminated);
    }

    let event = app_state.binding().event(&actor.snapshot(), action)?;
    let snapshot = actor
        .dispatch(event)
        .await
        .ok_or(ServerError::Terminated)?;
    debug!(state = ?snapshot.leaf(), "Action processed");

    Ok((StatusCode::ACCEPTED, Json(app_state.binding().view(&snapshot))))
}
