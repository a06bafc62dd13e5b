//! Repository for the `events` table.

use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::event::{CreateEvent, EventRow};

/// Column list for `events` queries.
const COLUMNS: &str =
    "id, name, start_date, end_date, utc_offset_minutes, benefits, created_at, updated_at";

/// Provides read/write operations for events.
pub struct EventRepo;

impl EventRepo {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<EventRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM events WHERE id = $1");
        sqlx::query_as::<_, EventRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &PgPool, input: &CreateEvent) -> Result<EventRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO events (id, name, start_date, end_date, utc_offset_minutes, benefits) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, EventRow>(&query)
            .bind(&input.id)
            .bind(&input.name)
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(input.utc_offset_minutes)
            .bind(Json(&input.benefits))
            .fetch_one(pool)
            .await
    }
}
