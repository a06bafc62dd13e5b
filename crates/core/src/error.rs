use chrono::NaiveDate;

use crate::types::{BenefitId, EventId, TicketId};

/// Generic domain errors shared by every layer above `core`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// Failures of the verification and redemption flow.
///
/// Every variant renders as a message that can be shown to the operator
/// as-is; none of them carry raw backend errors in their `Display` output
/// except the two store variants, whose detail is already sanitized by the
/// store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("The scanned code does not contain a ticket ID")]
    UnresolvableId { payload: String },

    #[error("No ticket exists with ID {ticket_id}")]
    TicketNotFound { ticket_id: TicketId },

    #[error("Ticket {ticket_id} exists but its event {event_id} could not be found")]
    EventNotFound {
        ticket_id: TicketId,
        event_id: EventId,
    },

    #[error("Incorrect PIN, please try again")]
    IncorrectPin,

    #[error("Too many incorrect PIN attempts, try again in {retry_after_secs} seconds")]
    PinLockedOut { retry_after_secs: u64 },

    #[error("Benefit {benefit_id} cannot be claimed on {date}")]
    NotEligibleToday {
        benefit_id: BenefitId,
        date: NaiveDate,
    },

    #[error("Benefit {benefit_id} was already used on {date}")]
    AlreadyUsedToday {
        benefit_id: BenefitId,
        date: NaiveDate,
    },

    #[error("Ticket has no benefit with ID {benefit_id}")]
    UnknownBenefit { benefit_id: BenefitId },

    #[error("Enter the ticket PIN before making changes")]
    Unauthorized,

    #[error("The change could not be saved, nothing was redeemed: {0}")]
    PersistenceFailure(String),

    #[error("Ticket {ticket_id} was changed on another device, review the latest state and retry")]
    ConcurrentModification { ticket_id: TicketId },

    #[error("The ticket could not be loaded: {0}")]
    LookupFailed(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}
