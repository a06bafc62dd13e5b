//! Repository for the `tickets` table.
//!
//! Updates are compare-and-swap on `version`: they return `None` when the
//! row is missing or its version moved on, and the new version otherwise.

use entrypass_core::ticket::{Benefit, TicketStatus};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::ticket::{CreateTicket, TicketRow};

/// Column list for `tickets` queries.
const COLUMNS: &str = "id, event_id, pin, holder_name, holder_email, holder_phone, \
    holder_photo_url, holder_title, status, benefits, version, created_at, updated_at";

/// Provides read/write operations for tickets.
pub struct TicketRepo;

impl TicketRepo {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<TicketRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tickets WHERE id = $1");
        sqlx::query_as::<_, TicketRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &PgPool, input: &CreateTicket) -> Result<TicketRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO tickets \
                (id, event_id, pin, holder_name, holder_email, holder_phone, \
                 holder_photo_url, holder_title, benefits) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TicketRow>(&query)
            .bind(&input.id)
            .bind(&input.event_id)
            .bind(&input.pin)
            .bind(&input.holder.name)
            .bind(&input.holder.email)
            .bind(&input.holder.phone)
            .bind(&input.holder.photo_url)
            .bind(&input.holder.title)
            .bind(Json(&input.benefits))
            .fetch_one(pool)
            .await
    }

    /// Replace the benefits array if the row is still at `expected_version`.
    pub async fn update_benefits(
        pool: &PgPool,
        id: &str,
        benefits: &[Benefit],
        expected_version: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE tickets SET benefits = $3, version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING version",
        )
        .bind(id)
        .bind(expected_version)
        .bind(Json(benefits))
        .fetch_optional(pool)
        .await
    }

    /// Set the ticket status if the row is still at `expected_version`.
    pub async fn update_status(
        pool: &PgPool,
        id: &str,
        status: TicketStatus,
        expected_version: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE tickets SET status = $3, version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING version",
        )
        .bind(id)
        .bind(expected_version)
        .bind(status.as_str())
        .fetch_optional(pool)
        .await
    }

    pub async fn exists(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tickets WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
    }
}
