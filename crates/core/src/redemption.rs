//! Redemption transaction.
//!
//! A [`VerificationSession`] is created from a resolved scan and owns the
//! working copy of the ticket for as long as the operator looks at it. Every
//! mutation follows the same protocol:
//!
//! 1. compute the new ledger (or status) locally,
//! 2. write it to the store, conditional on the ticket version the session
//!    last saw,
//! 3. install it in the session only once the write has succeeded.
//!
//! Callers hold the session exclusively for the whole call, so nobody can
//! observe the pending state, and a failed or abandoned write (timeout,
//! client disconnect) leaves the session exactly as it was before step 1.
//! A version mismatch additionally reloads the ticket so the operator sees
//! what the other device wrote.

use crate::error::VerifyError;
use crate::ledger::{BenefitLedger, BulkMark};
use crate::pin::{BulkConfirmation, GuardState, PinAttemptPolicy, PinGuard};
use crate::scan::Resolved;
use crate::schedule::{self, BenefitView, DayOverview, RedemptionDay};
use crate::store::{StoreError, TicketStore, TicketUpdate};
use crate::ticket::{Benefit, Event, Ticket, TicketStatus};
use crate::types::{BenefitId, Timestamp};

pub struct VerificationSession {
    /// Ticket header. Its `benefits` live in `ledger`.
    ticket: Ticket,
    event: Event,
    ledger: BenefitLedger,
    guard: PinGuard,
    bulk_guard: PinGuard,
}

impl VerificationSession {
    pub fn new(resolved: Resolved, policy: PinAttemptPolicy) -> Self {
        let Resolved { mut ticket, event } = resolved;
        let ledger = BenefitLedger::new(std::mem::take(&mut ticket.benefits));
        Self {
            ticket,
            event,
            ledger,
            guard: PinGuard::new(policy),
            bulk_guard: PinGuard::new(policy),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn ledger(&self) -> &BenefitLedger {
        &self.ledger
    }

    pub fn guard_state(&self) -> &GuardState {
        self.guard.state()
    }

    pub fn is_authorized(&self) -> bool {
        self.guard.is_authorized()
    }

    /// The calendar day a redemption at `at` counts against.
    pub fn today(&self, at: Timestamp) -> RedemptionDay {
        schedule::redemption_day(&self.event, self.event.local_now(at))
    }

    /// Benefits in scope for today, with status and countdown.
    pub fn today_overview(&self, at: Timestamp) -> Vec<BenefitView> {
        let now = self.event.local_now(at);
        match self.today(at).offset {
            Some(offset) => schedule::day_overview(&self.event, self.ledger.entries(), offset, now),
            None => Vec::new(),
        }
    }

    /// Every event day, for the ticket detail view.
    pub fn schedule_overview(&self, at: Timestamp) -> Vec<DayOverview> {
        let now = self.event.local_now(at);
        schedule::schedule_overview(&self.event, self.ledger.entries(), now)
    }

    // -- Authorization ------------------------------------------------------

    /// Unlock mutations for this session with the holder's PIN.
    pub fn authorize(&mut self, pin: &str, at: Timestamp) -> Result<(), VerifyError> {
        self.guard.authorize(pin, &self.ticket, at)?;
        tracing::info!(ticket_id = %self.ticket.id, "Verification session authorized");
        Ok(())
    }

    /// Fresh PIN entry for the bulk action, checked by a separate guard.
    pub fn confirm_bulk(&mut self, pin: &str, at: Timestamp) -> Result<BulkConfirmation, VerifyError> {
        self.require_authorized()?;
        self.bulk_guard.confirm(pin, &self.ticket, at)
    }

    fn require_authorized(&self) -> Result<(), VerifyError> {
        match self.guard.authorization() {
            Some(auth) if auth.ticket_id() == self.ticket.id => Ok(()),
            _ => Err(VerifyError::Unauthorized),
        }
    }

    // -- Mutations ----------------------------------------------------------

    /// Redeem one benefit for today. Returns the committed entry.
    pub async fn redeem(
        &mut self,
        store: &dyn TicketStore,
        benefit_id: &str,
        at: Timestamp,
    ) -> Result<Benefit, VerifyError> {
        self.require_authorized()?;
        let day = self.today(at);
        let next = self.ledger.mark_used(benefit_id, &day)?;

        self.commit_ledger(store, next).await?;
        tracing::info!(
            ticket_id = %self.ticket.id,
            benefit_id,
            day = ?day.offset,
            date = %day.date,
            "Benefit redeemed"
        );

        self.ledger
            .get(benefit_id)
            .cloned()
            .ok_or_else(|| VerifyError::UnknownBenefit {
                benefit_id: benefit_id.to_string(),
            })
    }

    /// Redeem everything claimable today in a single write.
    ///
    /// Consumes the confirmation. Returns the ids that were marked; an empty
    /// list means nothing was eligible and nothing was written.
    pub async fn redeem_all_today(
        &mut self,
        store: &dyn TicketStore,
        confirmation: BulkConfirmation,
        at: Timestamp,
    ) -> Result<Vec<BenefitId>, VerifyError> {
        self.require_authorized()?;
        if confirmation.ticket_id() != self.ticket.id {
            return Err(VerifyError::Unauthorized);
        }

        let day = self.today(at);
        let BulkMark { ledger, marked } = self.ledger.mark_all_eligible_today(&day);
        if marked.is_empty() {
            tracing::debug!(ticket_id = %self.ticket.id, "Nothing to redeem today");
            return Ok(marked);
        }

        self.commit_ledger(store, ledger).await?;
        tracing::info!(
            ticket_id = %self.ticket.id,
            count = marked.len(),
            day = ?day.offset,
            date = %day.date,
            "Benefits redeemed in bulk"
        );
        Ok(marked)
    }

    /// Flip the ticket between active and cancelled.
    pub async fn toggle_status(&mut self, store: &dyn TicketStore) -> Result<TicketStatus, VerifyError> {
        self.require_authorized()?;
        let next = crate::ledger::toggle_ticket_status(self.ticket.status);

        match store
            .update_ticket(&self.ticket.id, &TicketUpdate::Status(next), self.ticket.version)
            .await
        {
            Ok(version) => {
                self.ticket.status = next;
                self.ticket.version = version;
                tracing::info!(ticket_id = %self.ticket.id, status = %next, "Ticket status changed");
                Ok(next)
            }
            Err(err) => Err(self.write_failed(store, err).await),
        }
    }

    /// Re-read the ticket from the store, keeping the authorization.
    pub async fn reload(&mut self, store: &dyn TicketStore) -> Result<(), VerifyError> {
        let mut ticket = store
            .get_ticket(&self.ticket.id)
            .await
            .map_err(|e| VerifyError::LookupFailed(e.to_string()))?
            .ok_or_else(|| VerifyError::TicketNotFound {
                ticket_id: self.ticket.id.clone(),
            })?;
        self.ledger = BenefitLedger::new(std::mem::take(&mut ticket.benefits));
        self.ticket = ticket;
        Ok(())
    }

    async fn commit_ledger(
        &mut self,
        store: &dyn TicketStore,
        next: BenefitLedger,
    ) -> Result<(), VerifyError> {
        let update = TicketUpdate::Benefits(next.entries().to_vec());

        match store
            .update_ticket(&self.ticket.id, &update, self.ticket.version)
            .await
        {
            Ok(version) => {
                self.ledger = next;
                self.ticket.version = version;
                Ok(())
            }
            Err(err) => Err(self.write_failed(store, err).await),
        }
    }

    /// Map a failed write. A lost version race reloads.
    async fn write_failed(&mut self, store: &dyn TicketStore, err: StoreError) -> VerifyError {
        match err {
            StoreError::ConcurrentModification => {
                tracing::warn!(ticket_id = %self.ticket.id, "Ticket changed concurrently, reloading");
                if let Err(reload_err) = self.reload(store).await {
                    tracing::warn!(ticket_id = %self.ticket.id, error = %reload_err, "Reload failed");
                }
                VerifyError::ConcurrentModification {
                    ticket_id: self.ticket.id.clone(),
                }
            }
            StoreError::Backend(detail) => {
                tracing::error!(ticket_id = %self.ticket.id, error = %detail, "Ticket write failed");
                VerifyError::PersistenceFailure(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::schedule::BenefitStatus;
    use crate::store::testing::{benefit, summit, ticket, MemoryStore};

    const PIN: &str = "042042";

    fn at(d: u32, h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn setup(benefits: Vec<Benefit>) -> (MemoryStore, VerificationSession) {
        let t = ticket(benefits);
        let store = MemoryStore::with(vec![t.clone()], vec![summit()]);
        let session = VerificationSession::new(
            Resolved {
                ticket: t,
                event: summit(),
            },
            PinAttemptPolicy::default(),
        );
        (store, session)
    }

    fn authorized(benefits: Vec<Benefit>) -> (MemoryStore, VerificationSession) {
        let (store, mut session) = setup(benefits);
        session.authorize(PIN, at(1, 9, 0)).unwrap();
        (store, session)
    }

    fn status_of(session: &VerificationSession, id: &str, when: Timestamp) -> Option<BenefitStatus> {
        session
            .today_overview(when)
            .into_iter()
            .find(|v| v.benefit_id == id)
            .map(|v| v.status)
    }

    // -- Authorization gate -------------------------------------------------

    #[tokio::test]
    async fn mutations_before_authorization_are_rejected() {
        let (store, mut session) = setup(vec![benefit("lunch", &[1], None)]);

        assert_eq!(
            session.redeem(&store, "lunch", at(1, 12, 0)).await,
            Err(VerifyError::Unauthorized)
        );
        assert_eq!(session.toggle_status(&store).await, Err(VerifyError::Unauthorized));
        assert_matches!(session.confirm_bulk(PIN, at(1, 12, 0)), Err(VerifyError::Unauthorized));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn wrong_pin_keeps_session_locked() {
        let (store, mut session) = setup(vec![benefit("lunch", &[1], None)]);
        assert_eq!(session.authorize("420420", at(1, 9, 0)), Err(VerifyError::IncorrectPin));
        assert!(!session.is_authorized());
        assert_eq!(
            session.redeem(&store, "lunch", at(1, 12, 0)).await,
            Err(VerifyError::Unauthorized)
        );
    }

    // -- Single redemption --------------------------------------------------

    #[tokio::test]
    async fn redeem_persists_full_benefit_list() {
        let (store, mut session) = authorized(vec![
            benefit("lunch", &[1, 2], Some((12, 13))),
            benefit("dinner", &[1], None),
        ]);

        let lunch = session.redeem(&store, "lunch", at(1, 12, 30)).await.unwrap();
        assert!(lunch.used);
        assert_eq!(lunch.last_used_date, Some(date(1)));

        let stored = store.stored("tkt-1");
        assert_eq!(stored.benefits.len(), 2);
        assert_eq!(stored.benefits[0].last_used_date, Some(date(1)));
        assert_eq!(session.ticket().version, stored.version);
    }

    #[tokio::test]
    async fn lunch_status_follows_redemption_and_day_reset() {
        let (store, mut session) = authorized(vec![benefit("lunch", &[1, 2], Some((12, 13)))]);

        assert_eq!(status_of(&session, "lunch", at(1, 12, 30)), Some(BenefitStatus::Available));
        session.redeem(&store, "lunch", at(1, 12, 30)).await.unwrap();
        assert_eq!(status_of(&session, "lunch", at(1, 12, 31)), Some(BenefitStatus::InProgress));
        assert_eq!(status_of(&session, "lunch", at(1, 13, 5)), Some(BenefitStatus::Used));
        assert_eq!(status_of(&session, "lunch", at(2, 12, 0)), Some(BenefitStatus::Available));
    }

    #[tokio::test]
    async fn redeeming_twice_the_same_day_writes_once() {
        let (store, mut session) = authorized(vec![benefit("dinner", &[1], None)]);
        session.redeem(&store, "dinner", at(1, 19, 0)).await.unwrap();

        assert_matches!(
            session.redeem(&store, "dinner", at(1, 20, 0)).await,
            Err(VerifyError::AlreadyUsedToday { .. })
        );
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn ineligible_day_is_rejected_without_write() {
        let (store, mut session) = authorized(vec![benefit("dinner", &[1], None)]);
        assert_matches!(
            session.redeem(&store, "dinner", at(2, 19, 0)).await,
            Err(VerifyError::NotEligibleToday { .. })
        );
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn redeem_outside_time_window_is_rejected_without_write() {
        let (store, mut session) = authorized(vec![benefit("lunch", &[1], Some((12, 13)))]);

        assert_eq!(status_of(&session, "lunch", at(1, 18, 0)), Some(BenefitStatus::Expired));
        assert_matches!(
            session.redeem(&store, "lunch", at(1, 18, 0)).await,
            Err(VerifyError::NotEligibleToday { .. })
        );
        assert_matches!(
            session.redeem(&store, "lunch", at(1, 11, 59)).await,
            Err(VerifyError::NotEligibleToday { .. })
        );
        assert!(store.writes().is_empty());
        assert!(session.redeem(&store, "lunch", at(1, 12, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn failed_write_rolls_back() {
        let (store, mut session) = authorized(vec![benefit("dinner", &[1], None)]);
        store.fail_writes(true);

        assert_matches!(
            session.redeem(&store, "dinner", at(1, 19, 0)).await,
            Err(VerifyError::PersistenceFailure(_))
        );
        assert!(!session.ledger().get("dinner").unwrap().used);
        assert!(!store.stored("tkt-1").benefits[0].used);

        // The operator retries once the store is back.
        store.fail_writes(false);
        assert!(session.redeem(&store, "dinner", at(1, 19, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn abandoned_write_leaves_session_unchanged() {
        let (store, mut session) = authorized(vec![benefit("dinner", &[1], None)]);
        let version = session.ticket().version;
        store.stall_writes(true);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            session.redeem(&store, "dinner", at(1, 19, 0)),
        )
        .await;
        assert!(outcome.is_err(), "write should still be pending");

        assert!(!session.ledger().get("dinner").unwrap().used);
        assert_eq!(session.ticket().version, version);
        assert!(!store.stored("tkt-1").benefits[0].used);

        // Nothing was saved, so the operator can simply try again.
        store.stall_writes(false);
        let dinner = session.redeem(&store, "dinner", at(1, 19, 1)).await.unwrap();
        assert!(dinner.used);
        assert!(store.stored("tkt-1").benefits[0].used);
    }

    #[tokio::test]
    async fn abandoned_toggle_leaves_status_unchanged() {
        let (store, mut session) = authorized(vec![]);
        store.stall_writes(true);

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), session.toggle_status(&store)).await;
        assert!(outcome.is_err());
        assert_eq!(session.ticket().status, TicketStatus::Active);

        store.stall_writes(false);
        assert_eq!(session.toggle_status(&store).await, Ok(TicketStatus::Cancelled));
    }

    #[tokio::test]
    async fn concurrent_write_is_detected_and_reloaded() {
        let (store, mut session) = authorized(vec![
            benefit("lunch", &[1], None),
            benefit("dinner", &[1], None),
        ]);
        // Another device redeems lunch first.
        store.touch("tkt-1", |t| {
            t.benefits[0].used = true;
            t.benefits[0].last_used_date = Some(date(1));
        });

        assert_eq!(
            session.redeem(&store, "dinner", at(1, 19, 0)).await,
            Err(VerifyError::ConcurrentModification {
                ticket_id: "tkt-1".into()
            })
        );
        // Session now reflects the remote write and is still authorized.
        assert!(session.ledger().get("lunch").unwrap().used);
        assert!(!session.ledger().get("dinner").unwrap().used);
        assert!(session.is_authorized());

        assert!(session.redeem(&store, "dinner", at(1, 19, 1)).await.is_ok());
        assert_matches!(
            session.redeem(&store, "lunch", at(1, 19, 2)).await,
            Err(VerifyError::AlreadyUsedToday { .. })
        );
    }

    // -- Bulk ---------------------------------------------------------------

    #[tokio::test]
    async fn bulk_needs_fresh_pin_even_when_authorized() {
        let (_store, mut session) = authorized(vec![benefit("lunch", &[1], None)]);
        assert_eq!(
            session.confirm_bulk("000000", at(1, 12, 0)).unwrap_err(),
            VerifyError::IncorrectPin
        );
        assert!(session.is_authorized());
    }

    #[tokio::test]
    async fn bulk_marks_every_eligible_benefit_in_one_write() {
        let (store, mut session) = authorized(vec![
            benefit("lunch", &[1, 2], Some((12, 13))),
            benefit("dinner", &[1], None),
            benefit("closing", &[3], None),
        ]);
        session.redeem(&store, "lunch", at(1, 12, 10)).await.unwrap();

        let confirmation = session.confirm_bulk(PIN, at(1, 18, 0)).unwrap();
        let marked = session
            .redeem_all_today(&store, confirmation, at(1, 18, 0))
            .await
            .unwrap();

        assert_eq!(marked, vec!["dinner".to_string()]);
        assert_eq!(store.writes().len(), 2);
        assert!(!store.stored("tkt-1").benefits[2].used);
    }

    #[tokio::test]
    async fn bulk_skips_benefits_outside_their_window() {
        let (store, mut session) = authorized(vec![
            benefit("lunch", &[1], Some((12, 13))),
            benefit("badge", &[1], None),
        ]);

        let confirmation = session.confirm_bulk(PIN, at(1, 8, 0)).unwrap();
        let marked = session
            .redeem_all_today(&store, confirmation, at(1, 8, 0))
            .await
            .unwrap();

        assert_eq!(marked, vec!["badge".to_string()]);
        assert!(!store.stored("tkt-1").benefits[0].used);
        assert_eq!(status_of(&session, "lunch", at(1, 8, 0)), Some(BenefitStatus::Available));
    }

    #[tokio::test]
    async fn bulk_with_nothing_eligible_does_not_write() {
        let (store, mut session) = authorized(vec![benefit("closing", &[3], None)]);
        let confirmation = session.confirm_bulk(PIN, at(1, 18, 0)).unwrap();
        let marked = session
            .redeem_all_today(&store, confirmation, at(1, 18, 0))
            .await
            .unwrap();
        assert!(marked.is_empty());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn bulk_persistence_failure_leaves_ledger_unchanged() {
        let (store, mut session) = authorized(vec![
            benefit("lunch", &[1], None),
            benefit("dinner", &[1], None),
        ]);
        let before = session.ledger().clone();
        store.fail_writes(true);

        let confirmation = session.confirm_bulk(PIN, at(1, 18, 0)).unwrap();
        assert_matches!(
            session.redeem_all_today(&store, confirmation, at(1, 18, 0)).await,
            Err(VerifyError::PersistenceFailure(_))
        );
        assert_eq!(session.ledger(), &before);
    }

    #[tokio::test]
    async fn redemption_before_event_start_is_not_eligible() {
        let (store, mut session) = setup(vec![benefit("lunch", &[1], None)]);
        session.authorize(PIN, Utc.with_ymd_and_hms(2024, 5, 31, 9, 0, 0).unwrap()).unwrap();

        let early = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
        assert!(session.today_overview(early).is_empty());
        assert_matches!(
            session.redeem(&store, "lunch", early).await,
            Err(VerifyError::NotEligibleToday { .. })
        );
    }

    // -- Status -------------------------------------------------------------

    #[tokio::test]
    async fn toggle_status_round_trips() {
        let (store, mut session) = authorized(vec![]);
        assert_eq!(session.toggle_status(&store).await, Ok(TicketStatus::Cancelled));
        assert_eq!(store.stored("tkt-1").status, TicketStatus::Cancelled);
        assert_eq!(session.toggle_status(&store).await, Ok(TicketStatus::Active));
        assert_eq!(store.stored("tkt-1").status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn failed_toggle_restores_status() {
        let (store, mut session) = authorized(vec![]);
        store.fail_writes(true);
        assert_matches!(
            session.toggle_status(&store).await,
            Err(VerifyError::PersistenceFailure(_))
        );
        assert_eq!(session.ticket().status, TicketStatus::Active);
    }
}
