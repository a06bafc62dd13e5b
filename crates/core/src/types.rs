/// Ticket identifiers are opaque strings minted at issuance.
pub type TicketId = String;

/// Event identifiers are opaque strings.
pub type EventId = String;

/// Benefit identifiers match an event-level benefit definition.
pub type BenefitId = String;

/// All absolute timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
