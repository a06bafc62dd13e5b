//! PIN authorization guard.
//!
//! A verification session starts `Unauthorized`; the ticket holder's PIN
//! moves it to `Authorized` for the rest of the session. The guard mints the
//! capability tokens ([`Authorization`], [`BulkConfirmation`]) that mutating
//! operations require, so they cannot be obtained any other way.
//!
//! PINs are compared in constant time by HMAC-tagging both sides with a
//! per-guard random key. Equality is on the exact string, so `"012345"` never
//! matches `"12345"`.

use chrono::Duration;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::VerifyError;
use crate::ticket::Ticket;
use crate::types::{TicketId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of digits in a ticket PIN.
pub const PIN_LENGTH: usize = 6;

/// Default first lockout when a failure threshold is configured.
pub const DEFAULT_BASE_BACKOFF_SECS: u64 = 30;

/// Default ceiling for the exponential lockout.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 900;

/// Returns `true` for exactly six ASCII digits.
pub fn is_well_formed_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Attempt policy
// ---------------------------------------------------------------------------

/// Lockout policy for repeated incorrect PINs.
///
/// With `max_failures: None` (the default) attempts are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAttemptPolicy {
    pub max_failures: Option<u32>,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for PinAttemptPolicy {
    fn default() -> Self {
        Self {
            max_failures: None,
            base_backoff_secs: DEFAULT_BASE_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

impl PinAttemptPolicy {
    /// Lockout length after `consecutive_failures` misses, if any.
    ///
    /// Doubles for every failure past the threshold, capped at
    /// `max_backoff_secs`.
    pub fn lockout_secs(&self, consecutive_failures: u32) -> Option<u64> {
        let threshold = self.max_failures?;
        if consecutive_failures < threshold {
            return None;
        }
        let excess = consecutive_failures - threshold;
        let factor = 2u64.checked_pow(excess).unwrap_or(u64::MAX);
        Some(
            self.base_backoff_secs
                .saturating_mul(factor)
                .min(self.max_backoff_secs),
        )
    }
}

// ---------------------------------------------------------------------------
// Capability tokens
// ---------------------------------------------------------------------------

/// Proof that the holder's PIN was entered for a ticket in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    ticket_id: TicketId,
    granted_at: Timestamp,
}

impl Authorization {
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn granted_at(&self) -> Timestamp {
        self.granted_at
    }
}

/// Single-use re-confirmation for a bulk redemption.
#[derive(Debug, PartialEq, Eq)]
pub struct BulkConfirmation {
    ticket_id: TicketId,
}

impl BulkConfirmation {
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Unauthorized {
        failed_attempts: u32,
        locked_until: Option<Timestamp>,
    },
    Authorized(Authorization),
}

impl GuardState {
    fn fresh() -> Self {
        Self::Unauthorized {
            failed_attempts: 0,
            locked_until: None,
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

pub struct PinGuard {
    key: [u8; 32],
    policy: PinAttemptPolicy,
    state: GuardState,
}

impl PinGuard {
    pub fn new(policy: PinAttemptPolicy) -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);
        Self {
            key,
            policy,
            state: GuardState::fresh(),
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        match &self.state {
            GuardState::Authorized(auth) => Some(auth),
            GuardState::Unauthorized { .. } => None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization().is_some()
    }

    /// Check `input_pin` against the ticket and move to `Authorized` on a
    /// match. Already-authorized guards return the existing authorization.
    pub fn authorize(
        &mut self,
        input_pin: &str,
        ticket: &Ticket,
        at: Timestamp,
    ) -> Result<&Authorization, VerifyError> {
        if !self.is_authorized() {
            self.check_attempt(input_pin, ticket, at)?;
            self.state = GuardState::Authorized(Authorization {
                ticket_id: ticket.id.clone(),
                granted_at: at,
            });
        }
        self.authorization().ok_or(VerifyError::Unauthorized)
    }

    /// Check `input_pin` without changing the authorization state, returning a
    /// single-use confirmation. Used for the bulk action, which always wants a
    /// fresh PIN entry.
    pub fn confirm(
        &mut self,
        input_pin: &str,
        ticket: &Ticket,
        at: Timestamp,
    ) -> Result<BulkConfirmation, VerifyError> {
        self.check_attempt(input_pin, ticket, at)?;
        Ok(BulkConfirmation {
            ticket_id: ticket.id.clone(),
        })
    }

    /// Back to `Unauthorized` with a clean failure count.
    pub fn reset(&mut self) {
        self.state = GuardState::fresh();
    }

    fn check_attempt(
        &mut self,
        input_pin: &str,
        ticket: &Ticket,
        at: Timestamp,
    ) -> Result<(), VerifyError> {
        let failed = match &self.state {
            GuardState::Unauthorized {
                failed_attempts,
                locked_until,
            } => {
                if let Some(until) = locked_until.filter(|until| *until > at) {
                    let remaining = (until - at).num_seconds().max(1);
                    return Err(VerifyError::PinLockedOut {
                        retry_after_secs: u64::try_from(remaining).unwrap_or(1),
                    });
                }
                *failed_attempts
            }
            GuardState::Authorized(_) => 0,
        };

        if self.pins_match(input_pin, &ticket.pin) {
            if !self.is_authorized() {
                self.state = GuardState::fresh();
            }
            return Ok(());
        }

        let failed_attempts = failed.saturating_add(1);
        let locked_until = self.policy.lockout_secs(failed_attempts).map(|secs| {
            at + Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
        });
        tracing::warn!(
            ticket_id = %ticket.id,
            failed_attempts,
            locked = locked_until.is_some(),
            "Incorrect PIN entered"
        );
        if !self.is_authorized() {
            self.state = GuardState::Unauthorized {
                failed_attempts,
                locked_until,
            };
        }
        Err(VerifyError::IncorrectPin)
    }

    fn pins_match(&self, input: &str, expected: &str) -> bool {
        let Ok(mut expected_mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        expected_mac.update(expected.as_bytes());
        let expected_tag = expected_mac.finalize().into_bytes();

        let Ok(mut input_mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        input_mac.update(input.as_bytes());
        input_mac.verify_slice(&expected_tag).is_ok()
    }
}

/// Pure contract form of the guard check: exact string equality, compared in
/// constant time.
pub fn authorize(
    input_pin: &str,
    ticket: &Ticket,
    at: Timestamp,
) -> Result<Authorization, VerifyError> {
    PinGuard::new(PinAttemptPolicy::default())
        .authorize(input_pin, ticket, at)
        .cloned()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ticket::{Holder, TicketStatus};

    fn ticket(pin: &str) -> Ticket {
        Ticket {
            id: "t-1".into(),
            event_id: "e-1".into(),
            pin: pin.into(),
            holder: Holder {
                name: "Ada".into(),
                email: None,
                phone: None,
                photo_url: None,
                title: None,
            },
            status: TicketStatus::Active,
            benefits: vec![],
            version: 0,
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn policy(max_failures: u32) -> PinAttemptPolicy {
        PinAttemptPolicy {
            max_failures: Some(max_failures),
            base_backoff_secs: 30,
            max_backoff_secs: 120,
        }
    }

    // -- Contract -----------------------------------------------------------

    #[test]
    fn matching_pin_authorizes() {
        let auth = authorize("482913", &ticket("482913"), t0()).unwrap();
        assert_eq!(auth.ticket_id(), "t-1");
        assert_eq!(auth.granted_at(), t0());
    }

    #[test]
    fn mismatched_pin_is_incorrect() {
        assert_eq!(
            authorize("482914", &ticket("482913"), t0()),
            Err(VerifyError::IncorrectPin)
        );
    }

    #[test]
    fn leading_zero_pins_do_not_coerce() {
        let t = ticket("012345");
        assert!(authorize("12345", &t, t0()).is_err());
        assert!(authorize("0012345", &t, t0()).is_err());
        assert!(authorize(" 012345", &t, t0()).is_err());
        assert!(authorize("012345", &t, t0()).is_ok());
    }

    #[test]
    fn well_formed_pin_check() {
        assert!(is_well_formed_pin("000000"));
        assert!(!is_well_formed_pin("12345"));
        assert!(!is_well_formed_pin("12345a"));
        assert!(!is_well_formed_pin("١٢٣٤٥٦"));
    }

    // -- State machine ------------------------------------------------------

    #[test]
    fn unlimited_attempts_by_default() {
        let t = ticket("111111");
        let mut guard = PinGuard::new(PinAttemptPolicy::default());
        for _ in 0..50 {
            assert_eq!(
                guard.authorize("222222", &t, t0()),
                Err(VerifyError::IncorrectPin)
            );
        }
        assert!(guard.authorize("111111", &t, t0()).is_ok());
        assert!(guard.is_authorized());
    }

    #[test]
    fn authorized_state_is_sticky_until_reset() {
        let t = ticket("111111");
        let mut guard = PinGuard::new(PinAttemptPolicy::default());
        guard.authorize("111111", &t, t0()).unwrap();

        // A later wrong entry does not revoke the session's authorization.
        assert!(guard.authorize("999999", &t, t0()).is_ok());

        guard.reset();
        assert!(!guard.is_authorized());
        assert_matches!(
            guard.state(),
            GuardState::Unauthorized {
                failed_attempts: 0,
                locked_until: None
            }
        );
    }

    #[test]
    fn confirm_requires_fresh_pin_and_keeps_state() {
        let t = ticket("111111");
        let mut guard = PinGuard::new(PinAttemptPolicy::default());
        assert_eq!(guard.confirm("000000", &t, t0()), Err(VerifyError::IncorrectPin));
        let confirmation = guard.confirm("111111", &t, t0()).unwrap();
        assert_eq!(confirmation.ticket_id(), "t-1");
        assert!(!guard.is_authorized());
    }

    // -- Lockout policy -----------------------------------------------------

    #[test]
    fn lockout_grows_exponentially_and_caps() {
        let p = policy(3);
        assert_eq!(p.lockout_secs(2), None);
        assert_eq!(p.lockout_secs(3), Some(30));
        assert_eq!(p.lockout_secs(4), Some(60));
        assert_eq!(p.lockout_secs(5), Some(120));
        assert_eq!(p.lockout_secs(40), Some(120));
        assert_eq!(PinAttemptPolicy::default().lockout_secs(1000), None);
    }

    #[test]
    fn lockout_blocks_even_the_correct_pin_until_it_expires() {
        let t = ticket("111111");
        let mut guard = PinGuard::new(policy(2));

        assert_eq!(guard.authorize("000000", &t, t0()), Err(VerifyError::IncorrectPin));
        assert_eq!(guard.authorize("000000", &t, t0()), Err(VerifyError::IncorrectPin));

        let later = t0() + Duration::seconds(10);
        assert_eq!(
            guard.authorize("111111", &t, later),
            Err(VerifyError::PinLockedOut {
                retry_after_secs: 20
            })
        );

        let after = t0() + Duration::seconds(31);
        assert!(guard.authorize("111111", &t, after).is_ok());
    }

    #[test]
    fn success_resets_failure_count() {
        let t = ticket("111111");
        let mut guard = PinGuard::new(policy(2));
        assert!(guard.confirm("000000", &t, t0()).is_err());
        assert!(guard.confirm("111111", &t, t0()).is_ok());
        assert_matches!(
            guard.state(),
            GuardState::Unauthorized {
                failed_attempts: 0,
                ..
            }
        );
    }
}
