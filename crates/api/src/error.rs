use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use entrypass_core::error::{CoreError, VerifyError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`VerifyError`] and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent `{ "error", "code" }`
/// JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failure of the verification flow. Its message is operator-facing.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            },

            // --- Verification flow ---
            AppError::Verify(err) => {
                let (status, code) = classify_verify_error(err);
                if status.is_server_error() {
                    tracing::warn!(error = %err, code, "Verification failed on a collaborator");
                }
                (status, code, err.to_string())
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::Verify(VerifyError::PinLockedOut { retry_after_secs }) = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Map a verification failure onto an HTTP status and stable error code.
///
/// Session-level `Unauthorized` (PIN not entered yet) is a 403: the caller is
/// authenticated as staff but the session is still locked.
fn classify_verify_error(err: &VerifyError) -> (StatusCode, &'static str) {
    match err {
        VerifyError::UnresolvableId { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "UNRESOLVABLE_ID"),
        VerifyError::TicketNotFound { .. } => (StatusCode::NOT_FOUND, "TICKET_NOT_FOUND"),
        VerifyError::EventNotFound { .. } => (StatusCode::NOT_FOUND, "EVENT_NOT_FOUND"),
        VerifyError::IncorrectPin => (StatusCode::UNPROCESSABLE_ENTITY, "INCORRECT_PIN"),
        VerifyError::PinLockedOut { .. } => (StatusCode::TOO_MANY_REQUESTS, "PIN_LOCKED_OUT"),
        VerifyError::NotEligibleToday { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "NOT_ELIGIBLE_TODAY")
        }
        VerifyError::AlreadyUsedToday { .. } => (StatusCode::CONFLICT, "ALREADY_USED_TODAY"),
        VerifyError::UnknownBenefit { .. } => (StatusCode::NOT_FOUND, "UNKNOWN_BENEFIT"),
        VerifyError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
        VerifyError::PersistenceFailure(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_FAILURE")
        }
        VerifyError::ConcurrentModification { .. } => {
            (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
        }
        VerifyError::LookupFailed(_) => (StatusCode::SERVICE_UNAVAILABLE, "LOOKUP_FAILED"),
        VerifyError::CameraUnavailable(_) => (StatusCode::CONFLICT, "CAMERA_UNAVAILABLE"),
        VerifyError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
    }
}
