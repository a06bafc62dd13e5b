//! Collaborator interface to the remote ticket/event store.
//!
//! Writes are conditional on the ticket's `version`: a store must reject an
//! update whose `expected_version` no longer matches and report
//! [`StoreError::ConcurrentModification`], otherwise apply the change and
//! return the new version.

use async_trait::async_trait;

use crate::ticket::{Benefit, Event, Ticket, TicketStatus};

/// Partial ticket update merged into the stored ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketUpdate {
    /// Replace the whole benefits list.
    Benefits(Vec<Benefit>),
    Status(TicketStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("ticket was modified concurrently")]
    ConcurrentModification,

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, StoreError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Apply `update` if the stored version equals `expected_version`.
    /// Returns the new version.
    async fn update_ticket(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
        expected_version: i64,
    ) -> Result<i64, StoreError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store with failure injection for unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::ticket::Holder;

    #[derive(Default)]
    pub struct MemoryStore {
        tickets: Mutex<HashMap<String, Ticket>>,
        events: Mutex<HashMap<String, Event>>,
        fail_writes: Mutex<bool>,
        stall_writes: Mutex<bool>,
        writes: Mutex<Vec<TicketUpdate>>,
    }

    impl MemoryStore {
        pub fn with(tickets: Vec<Ticket>, events: Vec<Event>) -> Self {
            let store = Self::default();
            for t in tickets {
                store.tickets.lock().unwrap().insert(t.id.clone(), t);
            }
            for e in events {
                store.events.lock().unwrap().insert(e.id.clone(), e);
            }
            store
        }

        pub fn fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }

        /// Make every write hang forever, like a store that stopped answering.
        pub fn stall_writes(&self, stall: bool) {
            *self.stall_writes.lock().unwrap() = stall;
        }

        pub fn stored(&self, ticket_id: &str) -> Ticket {
            self.tickets.lock().unwrap()[ticket_id].clone()
        }

        pub fn writes(&self) -> Vec<TicketUpdate> {
            self.writes.lock().unwrap().clone()
        }

        /// Simulate another device writing the ticket.
        pub fn touch(&self, ticket_id: &str, edit: impl FnOnce(&mut Ticket)) {
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.get_mut(ticket_id).unwrap();
            edit(ticket);
            ticket.version += 1;
        }
    }

    #[async_trait]
    impl TicketStore for MemoryStore {
        async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, StoreError> {
            Ok(self.tickets.lock().unwrap().get(ticket_id).cloned())
        }

        async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
            Ok(self.events.lock().unwrap().get(event_id).cloned())
        }

        async fn update_ticket(
            &self,
            ticket_id: &str,
            update: &TicketUpdate,
            expected_version: i64,
        ) -> Result<i64, StoreError> {
            let stalled = *self.stall_writes.lock().unwrap();
            if stalled {
                std::future::pending::<()>().await;
            }
            if *self.fail_writes.lock().unwrap() {
                return Err(StoreError::Backend("connection reset".into()));
            }
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets
                .get_mut(ticket_id)
                .ok_or_else(|| StoreError::Backend("missing ticket".into()))?;
            if ticket.version != expected_version {
                return Err(StoreError::ConcurrentModification);
            }
            match update {
                TicketUpdate::Benefits(benefits) => ticket.benefits = benefits.clone(),
                TicketUpdate::Status(status) => ticket.status = *status,
            }
            ticket.version += 1;
            self.writes.lock().unwrap().push(update.clone());
            Ok(ticket.version)
        }
    }

    // -- Fixtures -----------------------------------------------------------

    /// Three-day event starting 2024-06-01, UTC wall clock.
    pub fn summit() -> Event {
        Event {
            id: "evt-summit".into(),
            name: "Summit".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 3),
            utc_offset_minutes: 0,
            benefits: vec![],
        }
    }

    pub fn benefit(id: &str, days: &[u32], window: Option<(u32, u32)>) -> Benefit {
        let hour = |h: u32| NaiveTime::from_hms_opt(h, 0, 0);
        Benefit {
            id: id.into(),
            name: id.to_uppercase(),
            used: false,
            last_used_date: None,
            days: days.iter().copied().collect(),
            start_time: window.and_then(|(s, _)| hour(s)),
            end_time: window.and_then(|(_, e)| hour(e)),
        }
    }

    /// Ticket `tkt-1` for [`summit`] with PIN `042042`.
    pub fn ticket(benefits: Vec<Benefit>) -> Ticket {
        Ticket {
            id: "tkt-1".into(),
            event_id: "evt-summit".into(),
            pin: "042042".into(),
            holder: Holder {
                name: "Grace Hopper".into(),
                email: Some("grace@example.com".into()),
                phone: None,
                photo_url: None,
                title: Some("Rear Admiral".into()),
            },
            status: TicketStatus::Active,
            benefits,
            version: 1,
        }
    }
}
