//! Server-side registry of open verification sessions.
//!
//! One session per scanned ticket per operator. Each session sits behind its
//! own async mutex; handlers take it with `try_lock`, so a second request for
//! the same session while a write is in flight is refused instead of queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use entrypass_core::error::CoreError;
use entrypass_core::redemption::VerificationSession;
use entrypass_core::roles::ROLE_ADMIN;
use entrypass_core::types::Timestamp;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::middleware::auth::AuthUser;

/// A verification session plus its bookkeeping.
pub struct SessionSlot {
    pub session: VerificationSession,
    pub last_active: Timestamp,
}

pub struct SessionEntry {
    /// Staff member who opened the session.
    pub owner: String,
    pub created_at: Timestamp,
    slot: Mutex<SessionSlot>,
}

impl SessionEntry {
    /// Take exclusive access, or fail with `Conflict` if a request already
    /// holds it.
    pub fn try_acquire(&self) -> Result<MutexGuard<'_, SessionSlot>, CoreError> {
        self.slot.try_lock().map_err(|_| {
            CoreError::Conflict("Another action on this ticket is still in progress".into())
        })
    }

    /// Owners and admins may use a session.
    pub fn ensure_access(&self, user: &AuthUser) -> Result<(), CoreError> {
        if self.owner == user.user_id || user.role == ROLE_ADMIN {
            Ok(())
        } else {
            Err(CoreError::Forbidden(
                "This verification belongs to another operator".into(),
            ))
        }
    }
}

/// Manages all open verification sessions.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a new session and return its id.
    pub async fn open(&self, owner: &str, session: VerificationSession, now: Timestamp) -> Uuid {
        let id = Uuid::new_v4();
        let entry = SessionEntry {
            owner: owner.to_string(),
            created_at: now,
            slot: Mutex::new(SessionSlot {
                session,
                last_active: now,
            }),
        };
        self.sessions.write().await.insert(id, Arc::new(entry));
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<SessionEntry>, CoreError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "Verification",
                id: id.to_string(),
            })
    }

    /// Discard a session. Returns `false` if it did not exist.
    pub async fn close(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for longer than the TTL. Sessions currently in use
    /// are never dropped. Returns the number removed.
    pub async fn sweep_expired(&self, now: Timestamp) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.slot.try_lock() {
            Ok(slot) => now - slot.last_active <= ttl,
            Err(_) => true,
        });
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use entrypass_core::pin::PinAttemptPolicy;
    use entrypass_core::scan::Resolved;
    use entrypass_core::ticket::{Event, Holder, Ticket, TicketStatus};

    use super::*;

    fn session() -> VerificationSession {
        let ticket = Ticket {
            id: "tkt-1".into(),
            event_id: "evt-1".into(),
            pin: "123456".into(),
            holder: Holder {
                name: "Ada".into(),
                email: None,
                phone: None,
                photo_url: None,
                title: None,
            },
            status: TicketStatus::Active,
            benefits: vec![],
            version: 1,
        };
        let event = Event {
            id: "evt-1".into(),
            name: "Summit".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: None,
            utc_offset_minutes: 0,
            benefits: vec![],
        };
        VerificationSession::new(Resolved { ticket, event }, PinAttemptPolicy::default())
    }

    fn at(min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, min, 0).unwrap()
    }

    fn user(id: &str, role: &str) -> AuthUser {
        AuthUser {
            user_id: id.into(),
            role: role.into(),
        }
    }

    #[tokio::test]
    async fn second_acquire_conflicts() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.open("door-1", session(), at(0)).await;
        let entry = manager.get(id).await.unwrap();

        let _held = entry.try_acquire().unwrap();
        assert!(matches!(entry.try_acquire(), Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn only_owner_or_admin_has_access() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.open("door-1", session(), at(0)).await;
        let entry = manager.get(id).await.unwrap();

        assert!(entry.ensure_access(&user("door-1", "staff")).is_ok());
        assert!(entry.ensure_access(&user("boss", "admin")).is_ok());
        assert!(matches!(
            entry.ensure_access(&user("door-2", "staff")),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let manager = SessionManager::new(Duration::from_secs(5 * 60));
        let stale = manager.open("door-1", session(), at(0)).await;
        let fresh = manager.open("door-1", session(), at(8)).await;
        let busy = manager.open("door-1", session(), at(0)).await;

        let busy_entry = manager.get(busy).await.unwrap();
        let _held = busy_entry.try_acquire().unwrap();

        assert_eq!(manager.sweep_expired(at(10)).await, 1);
        assert!(manager.get(stale).await.is_err());
        assert!(manager.get(fresh).await.is_ok());
        assert!(manager.get(busy).await.is_ok());
    }

    #[tokio::test]
    async fn close_reports_missing_sessions() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.open("door-1", session(), at(0)).await;
        assert!(manager.close(id).await);
        assert!(!manager.close(id).await);
        assert_eq!(manager.count().await, 0);
    }
}
