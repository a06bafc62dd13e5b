pub mod health;
pub mod verification;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /verifications                               open a verification from a scan
/// /verifications/{id}                          view, close
/// /verifications/{id}/authorize                PIN entry
/// /verifications/{id}/benefits/{bid}/redeem    redeem one benefit today
/// /verifications/{id}/redeem-all               redeem everything due today
/// /verifications/{id}/status/toggle            activate / cancel the ticket
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/verifications", verification::router())
}
