//! Day/Window calculator.
//!
//! Maps an event's schedule, a ticket benefit and an explicit local `now`
//! onto a discrete [`BenefitStatus`]. All day arithmetic uses 1-based day
//! offsets relative to the event's start date, and all time-of-day checks are
//! made against the specific calendar day in question rather than "today".

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::ticket::{Benefit, Event};
use crate::types::BenefitId;

// ---------------------------------------------------------------------------
// Day arithmetic
// ---------------------------------------------------------------------------

/// Inclusive day count from the event start to `date` (start date is day 1).
///
/// Dates before the event starts clamp to day 1.
pub fn day_offset(event: &Event, date: NaiveDate) -> u32 {
    let elapsed = (date - event.start_date).num_days();
    if elapsed < 0 {
        1
    } else {
        u32::try_from(elapsed + 1).unwrap_or(u32::MAX)
    }
}

/// Calendar date of a 1-based day offset. Offset 0 is treated as day 1.
pub fn date_for_day(event: &Event, day_offset: u32) -> NaiveDate {
    let days = Days::new(u64::from(day_offset.saturating_sub(1)));
    event
        .start_date
        .checked_add_days(days)
        .unwrap_or(NaiveDate::MAX)
}

/// Number of event days. Single-day events (no or inverted end date) have 1.
pub fn event_day_count(event: &Event) -> u32 {
    match event.end_date {
        Some(end) if end >= event.start_date => day_offset(event, end),
        _ => 1,
    }
}

/// The calendar day a redemption made at `now` is recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionDay {
    pub date: NaiveDate,
    /// `None` while the event has not started yet.
    pub offset: Option<u32>,
    /// Local time of day the redemption is attempted at.
    pub time: NaiveTime,
}

impl RedemptionDay {
    /// The benefit is scheduled for this event day.
    pub fn is_scheduled(&self, benefit: &Benefit) -> bool {
        self.offset
            .is_some_and(|offset| benefit.is_claimable_on_day(offset))
    }

    /// The benefit has no time window, or `time` falls inside it.
    pub fn is_within_window(&self, benefit: &Benefit) -> bool {
        benefit
            .time_window()
            .map_or(true, |window| window.contains(self.time))
    }

    /// The benefit can be redeemed right now, ignoring earlier use.
    pub fn is_claimable(&self, benefit: &Benefit) -> bool {
        self.is_scheduled(benefit) && self.is_within_window(benefit)
    }
}

/// Resolve the redemption day for a local wall-clock `now`.
pub fn redemption_day(event: &Event, now: NaiveDateTime) -> RedemptionDay {
    let date = now.date();
    let offset = (date >= event.start_date).then(|| day_offset(event, date));
    RedemptionDay {
        date,
        offset,
        time: now.time(),
    }
}

// ---------------------------------------------------------------------------
// Benefit status
// ---------------------------------------------------------------------------

/// Display state of one benefit on one event day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenefitStatus {
    /// The day has not started yet.
    Locked,
    Available,
    /// Claimed today and the claim window is currently open.
    InProgress,
    /// Not claimed and the day's window has closed.
    Expired,
    Used,
}

impl BenefitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Expired => "expired",
            Self::Used => "used",
        }
    }
}

/// Status of `benefit` on event day `day_offset` as seen at local time `now`.
///
/// Returns `None` when the benefit is not claimable on that day at all;
/// such benefits are not displayed for the day.
pub fn benefit_status(
    event: &Event,
    benefit: &Benefit,
    day_offset: u32,
    now: NaiveDateTime,
) -> Option<BenefitStatus> {
    if !benefit.is_claimable_on_day(day_offset) {
        return None;
    }

    let day = date_for_day(event, day_offset);
    let today = now.date();
    if day > today {
        return Some(BenefitStatus::Locked);
    }

    let window = benefit.time_window();

    if benefit.is_used_on(day) {
        let serving_now = day == today && window.is_some_and(|w| w.contains(now.time()));
        return Some(if serving_now {
            BenefitStatus::InProgress
        } else {
            BenefitStatus::Used
        });
    }

    if let Some(window) = window {
        if now >= day.and_time(window.end) {
            return Some(BenefitStatus::Expired);
        }
    }

    Some(BenefitStatus::Available)
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

/// Time until a benefit's window opens or closes on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowCountdown {
    OpensIn { seconds: i64 },
    ClosesIn { seconds: i64 },
}

/// Countdown for the benefit's window on `day_offset`, or `None` when the
/// benefit has no window or the window has already closed.
pub fn window_countdown(
    event: &Event,
    benefit: &Benefit,
    day_offset: u32,
    now: NaiveDateTime,
) -> Option<WindowCountdown> {
    let window = benefit.time_window()?;
    let day = date_for_day(event, day_offset);
    let opens = day.and_time(window.start);
    let closes = day.and_time(window.end);

    if now < opens {
        Some(WindowCountdown::OpensIn {
            seconds: (opens - now).num_seconds(),
        })
    } else if now < closes {
        Some(WindowCountdown::ClosesIn {
            seconds: (closes - now).num_seconds(),
        })
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Overviews
// ---------------------------------------------------------------------------

/// One benefit as rendered for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenefitView {
    pub benefit_id: BenefitId,
    pub name: String,
    pub day: u32,
    pub date: NaiveDate,
    pub status: BenefitStatus,
    pub countdown: Option<WindowCountdown>,
    #[serde(serialize_with = "serialize_hhmm")]
    pub start_time: Option<NaiveTime>,
    #[serde(serialize_with = "serialize_hhmm")]
    pub end_time: Option<NaiveTime>,
}

/// All benefits in scope for one event day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOverview {
    pub day: u32,
    pub date: NaiveDate,
    pub benefits: Vec<BenefitView>,
}

/// In-scope benefits for `day_offset`, in ledger order.
pub fn day_overview(
    event: &Event,
    benefits: &[Benefit],
    day_offset: u32,
    now: NaiveDateTime,
) -> Vec<BenefitView> {
    let date = date_for_day(event, day_offset);
    benefits
        .iter()
        .filter_map(|benefit| {
            let status = benefit_status(event, benefit, day_offset, now)?;
            let countdown = match status {
                BenefitStatus::Available | BenefitStatus::InProgress => {
                    window_countdown(event, benefit, day_offset, now)
                }
                _ => None,
            };
            Some(BenefitView {
                benefit_id: benefit.id.clone(),
                name: benefit.name.clone(),
                day: day_offset,
                date,
                status,
                countdown,
                start_time: benefit.start_time,
                end_time: benefit.end_time,
            })
        })
        .collect()
}

/// Longest schedule rendered by [`schedule_overview`], in days.
pub const MAX_SCHEDULE_DAYS: u32 = 366;

/// Per-day overview covering every event day and any benefit day beyond it,
/// truncated to [`MAX_SCHEDULE_DAYS`].
pub fn schedule_overview(
    event: &Event,
    benefits: &[Benefit],
    now: NaiveDateTime,
) -> Vec<DayOverview> {
    let last_benefit_day = benefits
        .iter()
        .filter_map(|b| b.days.last().copied())
        .max()
        .unwrap_or(0);
    let last_day = event_day_count(event)
        .max(last_benefit_day)
        .min(MAX_SCHEDULE_DAYS);

    (1..=last_day)
        .map(|day| DayOverview {
            day,
            date: date_for_day(event, day),
            benefits: day_overview(event, benefits, day, now),
        })
        .collect()
}

fn serialize_hhmm<S: serde::Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(time) => s.serialize_str(&time.format("%H:%M").to_string()),
        None => s.serialize_none(),
    }
}
