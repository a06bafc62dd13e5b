//! Well-known staff role names carried in access-token claims.

/// Full administrative access.
pub const ROLE_ADMIN: &str = "admin";

/// Door staff operating the scanner.
pub const ROLE_STAFF: &str = "staff";

/// Returns `true` if the role may operate the verification flow.
pub fn can_verify_tickets(role: &str) -> bool {
    role == ROLE_ADMIN || role == ROLE_STAFF
}
