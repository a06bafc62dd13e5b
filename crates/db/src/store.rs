//! [`TicketStore`] backed by PostgreSQL.

use async_trait::async_trait;
use entrypass_core::store::{StoreError, TicketStore, TicketUpdate};
use entrypass_core::ticket::{Event, Ticket};

use crate::repositories::{EventRepo, TicketRepo};
use crate::DbPool;

#[derive(Debug, Clone)]
pub struct PgTicketStore {
    pool: DbPool,
}

impl PgTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "Ticket store query failed");
    StoreError::Backend("the ticket database is unavailable".to_string())
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, StoreError> {
        let Some(row) = TicketRepo::find_by_id(&self.pool, ticket_id)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        Ticket::try_from(row).map(Some).map_err(|detail| {
            tracing::error!(ticket_id, %detail, "Malformed ticket row");
            StoreError::Backend(detail)
        })
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let row = EventRepo::find_by_id(&self.pool, event_id)
            .await
            .map_err(backend)?;
        Ok(row.map(Event::from))
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let written = match update {
            TicketUpdate::Benefits(benefits) => {
                TicketRepo::update_benefits(&self.pool, ticket_id, benefits, expected_version).await
            }
            TicketUpdate::Status(status) => {
                TicketRepo::update_status(&self.pool, ticket_id, *status, expected_version).await
            }
        }
        .map_err(backend)?;

        if let Some(version) = written {
            return Ok(version);
        }

        // No row matched: either the version moved on or the ticket is gone.
        if TicketRepo::exists(&self.pool, ticket_id).await.map_err(backend)? {
            tracing::debug!(ticket_id, expected_version, "Version check failed");
            Err(StoreError::ConcurrentModification)
        } else {
            Err(StoreError::Backend(format!("ticket {ticket_id} no longer exists")))
        }
    }
}
