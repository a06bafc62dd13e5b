//! Route definitions for the verification flow, mounted at `/verifications`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::verification;
use crate::state::AppState;

/// ```text
/// POST   /                                   -> create_verification
/// GET    /{id}                               -> get_verification
/// DELETE /{id}                               -> close_verification
/// POST   /{id}/authorize                     -> authorize
/// POST   /{id}/benefits/{benefit_id}/redeem  -> redeem_benefit
/// POST   /{id}/redeem-all                    -> redeem_all
/// POST   /{id}/status/toggle                 -> toggle_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(verification::create_verification))
        .route(
            "/{id}",
            get(verification::get_verification).delete(verification::close_verification),
        )
        .route("/{id}/authorize", post(verification::authorize))
        .route(
            "/{id}/benefits/{benefit_id}/redeem",
            post(verification::redeem_benefit),
        )
        .route("/{id}/redeem-all", post(verification::redeem_all))
        .route("/{id}/status/toggle", post(verification::toggle_status))
}
