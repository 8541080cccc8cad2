//! HTTP route handlers.

pub mod contact;

use axum::Router;

use crate::state::AppState;

/// All application routes, without middleware.
pub fn router() -> Router<AppState> {
    Router::new().merge(contact::router())
}
