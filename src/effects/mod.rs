//! Effects-as-data for GitHub operations.
//!
//! Workflow services describe what they need from GitHub as `GitHubEffect`
//! values and hand them to a `GitHubInterpreter`. This keeps the services
//! testable against mock interpreters and gives every remote call a loggable,
//! serializable description.

pub mod github;
pub mod interpreter;

pub use github::{GitHubEffect, GitHubResponse};
pub use interpreter::GitHubInterpreter;
