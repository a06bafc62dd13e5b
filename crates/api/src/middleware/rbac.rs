//! Role-based access control extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use entrypass_core::error::CoreError;
use entrypass_core::roles::can_verify_tickets;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Requires a role allowed to verify tickets (`staff` or `admin`).
/// Rejects with 403 Forbidden otherwise.
///
/// ```ignore
/// async fn scan(RequireStaff(user): RequireStaff) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
pub struct RequireStaff(pub AuthUser);

impl FromRequestParts<AppState> for RequireStaff {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !can_verify_tickets(&user.role) {
            return Err(AppError::Core(CoreError::Forbidden(
                "Staff or Admin role required".into(),
            )));
        }
        Ok(RequireStaff(user))
    }
}
