use chrono::NaiveDate;
use entrypass_core::ticket::{BenefitDefinition, Event};
use entrypass_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `events` table.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub utc_offset_minutes: i32,
    pub benefits: Json<Vec<BenefitDefinition>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            utc_offset_minutes: row.utc_offset_minutes,
            benefits: row.benefits.0,
        }
    }
}

/// Insert DTO for seeding and administration.
#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub utc_offset_minutes: i32,
    pub benefits: Vec<BenefitDefinition>,
}
