//! Benefit ledger: the in-memory working copy of a ticket's benefits.
//!
//! Mutations return a new ledger and leave `self` untouched, which is what
//! lets the redemption transaction keep the pre-mutation snapshot around for
//! rollback. The ledger never persists anything itself.

use crate::error::VerifyError;
use crate::schedule::RedemptionDay;
use crate::ticket::{Benefit, TicketStatus};
use crate::types::BenefitId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenefitLedger {
    entries: Vec<Benefit>,
}

/// Result of a bulk mark: the new ledger and the ids that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkMark {
    pub ledger: BenefitLedger,
    pub marked: Vec<BenefitId>,
}

impl BenefitLedger {
    pub fn new(entries: Vec<Benefit>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Benefit] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Benefit> {
        self.entries
    }

    pub fn get(&self, benefit_id: &str) -> Option<&Benefit> {
        self.entries.iter().find(|b| b.id == benefit_id)
    }

    /// Redeem one benefit on `day`.
    ///
    /// Rejects benefits not scheduled for the day, benefits already used on
    /// the same calendar date and benefits whose time window is not open at
    /// `day.time`; in every case no entry changes.
    pub fn mark_used(&self, benefit_id: &str, day: &RedemptionDay) -> Result<Self, VerifyError> {
        let index = self
            .entries
            .iter()
            .position(|b| b.id == benefit_id)
            .ok_or_else(|| VerifyError::UnknownBenefit {
                benefit_id: benefit_id.to_string(),
            })?;

        let entry = &self.entries[index];
        let not_eligible = || VerifyError::NotEligibleToday {
            benefit_id: entry.id.clone(),
            date: day.date,
        };
        if !day.is_scheduled(entry) {
            return Err(not_eligible());
        }
        if entry.is_used_on(day.date) {
            return Err(VerifyError::AlreadyUsedToday {
                benefit_id: entry.id.clone(),
                date: day.date,
            });
        }
        if !day.is_within_window(entry) {
            return Err(not_eligible());
        }

        let mut next = self.clone();
        redeem(&mut next.entries[index], day);
        Ok(next)
    }

    /// Redeem every benefit claimable at `day` that is not yet used that day.
    ///
    /// Entries are independent: ineligible, out-of-window or already-used
    /// entries are left as they are and do not prevent the others from being
    /// marked.
    pub fn mark_all_eligible_today(&self, day: &RedemptionDay) -> BulkMark {
        let mut next = self.clone();
        let mut marked = Vec::new();

        for entry in &mut next.entries {
            if day.is_claimable(entry) && !entry.is_used_on(day.date) {
                redeem(entry, day);
                marked.push(entry.id.clone());
            }
        }

        BulkMark {
            ledger: next,
            marked,
        }
    }
}

/// Flip a ticket between active and cancelled.
pub fn toggle_ticket_status(current: TicketStatus) -> TicketStatus {
    current.toggled()
}

fn redeem(entry: &mut Benefit, day: &RedemptionDay) {
    entry.used = true;
    entry.last_used_date = Some(day.date);
}
