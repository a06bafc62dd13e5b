//! Ticket, benefit and event data model.
//!
//! Benefits are stored as embedded JSON documents on the ticket, so their
//! serde representation is the storage format: camelCase keys, dates as
//! `yyyy-MM-dd` and daily window bounds as `HH:mm`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::types::{BenefitId, EventId, TicketId, Timestamp};

// ---------------------------------------------------------------------------
// Ticket status
// ---------------------------------------------------------------------------

/// Whether a ticket is currently honoured at the door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Cancelled,
}

impl TicketStatus {
    /// The other state. Both states are freely reversible by staff.
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Cancelled,
            Self::Cancelled => Self::Active,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stored string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Benefits
// ---------------------------------------------------------------------------

/// A daily claim window, half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// One claimable perk in a ticket's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    pub id: BenefitId,
    pub name: String,
    /// True once redeemed on any day.
    #[serde(default)]
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_date: Option<NaiveDate>,
    /// 1-based event day offsets on which this benefit may be claimed.
    #[serde(default)]
    pub days: BTreeSet<u32>,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

impl Benefit {
    /// The daily claim window, if both bounds are set and ordered.
    pub fn time_window(&self) -> Option<TimeWindow> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => Some(TimeWindow { start, end }),
            _ => None,
        }
    }

    pub fn is_claimable_on_day(&self, day_offset: u32) -> bool {
        self.days.contains(&day_offset)
    }

    /// Redeemed on exactly this calendar date.
    pub fn is_used_on(&self, date: NaiveDate) -> bool {
        self.used && self.last_used_date == Some(date)
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Ticket holder attributes. Never modified by the verification flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holder {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub title: Option<String>,
}

/// An issued ticket as loaded from the ticket store.
#[derive(Clone, PartialEq)]
pub struct Ticket {
    pub id: TicketId,
    pub event_id: EventId,
    /// 6-digit numeric string held by the ticket holder.
    pub pin: String,
    pub holder: Holder,
    pub status: TicketStatus,
    pub benefits: Vec<Benefit>,
    /// Monotonic write counter used for compare-and-swap updates.
    pub version: i64,
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("event_id", &self.event_id)
            .field("pin", &"******")
            .field("holder", &self.holder)
            .field("status", &self.status)
            .field("benefits", &self.benefits)
            .field("version", &self.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Event-level benefit catalog entry. Reference metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenefitDefinition {
    pub id: BenefitId,
    pub name: String,
    /// Price in the event currency's minor unit.
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub days: BTreeSet<u32>,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

/// The event a ticket belongs to. Read-only for this subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    /// Day 1 of the event.
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Fixed offset of the venue's wall clock from UTC.
    pub utc_offset_minutes: i32,
    pub benefits: Vec<BenefitDefinition>,
}

impl Event {
    /// Convert an absolute instant into the venue's local wall-clock time.
    ///
    /// Offsets of a full day or more are treated as UTC.
    pub fn local_now(&self, at: Timestamp) -> NaiveDateTime {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .map(|offset| at.with_timezone(&offset).naive_local())
            .unwrap_or_else(|| at.naive_utc())
    }

    pub fn benefit_definition(&self, benefit_id: &str) -> Option<&BenefitDefinition> {
        self.benefits.iter().find(|b| b.id == benefit_id)
    }
}

// ---------------------------------------------------------------------------
// `HH:mm` serde helper
// ---------------------------------------------------------------------------

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => s.serialize_str(&time.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    /// Blank strings are read as "no bound".
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => NaiveTime::parse_from_str(s, FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
