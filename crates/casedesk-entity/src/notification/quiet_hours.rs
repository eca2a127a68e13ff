//! Per-user do-not-disturb window.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A daily quiet window in the user's local time.
///
/// The window is half-open, `[start, end)`, and wraps midnight when
/// `start > end` (e.g. 22:00–07:00). `start == end` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Local time the window opens.
    pub start: NaiveTime,
    /// Local time the window closes (exclusive).
    pub end: NaiveTime,
    /// IANA timezone the window is expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl QuietHours {
    /// Create a window.
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
        }
    }

    /// Whether the window never covers any instant.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the window wraps past local midnight.
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Whether the local wall-clock time `t` falls inside the window.
    pub fn contains_local(&self, t: NaiveTime) -> bool {
        if self.is_empty() {
            false
        } else if self.wraps_midnight() {
            t >= self.start || t < self.end
        } else {
            t >= self.start && t < self.end
        }
    }

    /// Whether the instant `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.contains_local(at.with_timezone(&self.timezone).time())
    }

    /// The instant the window containing `at` closes, or `None` when `at`
    /// is outside the window.
    pub fn hold_until(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = at.with_timezone(&self.timezone);
        let t = local.time();
        if !self.contains_local(t) {
            return None;
        }

        let today = local.date_naive();
        let end_date = if self.wraps_midnight() && t >= self.start {
            today.succ_opt()?
        } else {
            today
        };

        Some(self.resolve_local(end_date, self.end))
    }

    /// Convert a local wall-clock reading to UTC; a time skipped by a DST
    /// jump resolves to the first valid minute after the gap.
    fn resolve_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = NaiveDateTime::new(date, time);
        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => (1..=24 * 60)
                .map(|m| naive + Duration::minutes(m))
                .find_map(|n| self.timezone.from_local_datetime(&n).earliest())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        }
    }
}

fn default_timezone() -> Tz {
    Tz::UTC
}
