//! Quiet-hours gate: deliver now or hold until the recipient's window ends.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use casedesk_core::clock::Clock;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_entity::notification::{DeliveryPlan, QuietHours};

/// Per-user do-not-disturb preference lookup.
#[async_trait]
pub trait QuietHoursLookup: Send + Sync + fmt::Debug {
    /// The user's quiet window, or `None` when none is configured.
    async fn quiet_hours(&self, user_id: UserId) -> AppResult<Option<QuietHours>>;
}

/// Decides the [`DeliveryPlan`] for each recipient.
///
/// The gate never fails: a lookup error or a missing preference record
/// yields immediate delivery.
#[derive(Debug, Clone)]
pub struct QuietHoursGate {
    lookup: Arc<dyn QuietHoursLookup>,
    clock: Arc<dyn Clock>,
}

impl QuietHoursGate {
    /// Create a gate stamping immediate deliveries with `clock`.
    pub fn new(lookup: Arc<dyn QuietHoursLookup>, clock: Arc<dyn Clock>) -> Self {
        Self { lookup, clock }
    }

    /// Plan delivery to `recipient` of an event that originated at `occurred_at`.
    pub async fn plan(&self, recipient: UserId, occurred_at: DateTime<Utc>) -> DeliveryPlan {
        let window = match self.lookup.quiet_hours(recipient).await {
            Ok(Some(window)) => window,
            Ok(None) => return self.immediate(),
            Err(e) => {
                warn!(
                    recipient_id = %recipient,
                    error = %e,
                    "Quiet-hours lookup failed, delivering immediately"
                );
                return self.immediate();
            }
        };

        match window.hold_until(occurred_at) {
            Some(until) => {
                debug!(recipient_id = %recipient, until = %until, "Holding for quiet hours");
                DeliveryPlan::HoldUntil { until }
            }
            None => self.immediate(),
        }
    }

    fn immediate(&self) -> DeliveryPlan {
        DeliveryPlan::Immediate {
            at: self.clock.now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::Tz;

    use super::*;
    use casedesk_core::clock::ManualClock;
    use casedesk_core::error::AppError;

    #[derive(Debug, Default)]
    pub(crate) struct FakeQuietHours {
        pub windows: HashMap<UserId, QuietHours>,
        pub broken: Vec<UserId>,
    }

    #[async_trait]
    impl QuietHoursLookup for FakeQuietHours {
        async fn quiet_hours(&self, user_id: UserId) -> AppResult<Option<QuietHours>> {
            if self.broken.contains(&user_id) {
                return Err(AppError::database("preferences table unavailable"));
            }
            Ok(self.windows.get(&user_id).copied())
        }
    }

    pub(crate) fn overnight() -> QuietHours {
        QuietHours::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            Tz::UTC,
        )
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_event_inside_window_is_held() {
        let user = UserId::new();
        let lookup = FakeQuietHours {
            windows: HashMap::from([(user, overnight())]),
            ..Default::default()
        };
        let gate = QuietHoursGate::new(Arc::new(lookup), Arc::new(ManualClock::new(at(1, 23, 0))));

        assert_eq!(
            gate.plan(user, at(1, 23, 0)).await,
            DeliveryPlan::HoldUntil { until: at(2, 7, 0) }
        );
    }

    #[tokio::test]
    async fn test_event_at_window_end_is_immediate() {
        let user = UserId::new();
        let lookup = FakeQuietHours {
            windows: HashMap::from([(user, overnight())]),
            ..Default::default()
        };
        let gate = QuietHoursGate::new(Arc::new(lookup), Arc::new(ManualClock::new(at(2, 7, 0))));

        assert_eq!(
            gate.plan(user, at(2, 7, 0)).await,
            DeliveryPlan::Immediate { at: at(2, 7, 0) }
        );
    }

    #[tokio::test]
    async fn test_missing_or_failing_preferences_deliver_immediately() {
        let (unset, broken) = (UserId::new(), UserId::new());
        let lookup = FakeQuietHours {
            broken: vec![broken],
            ..Default::default()
        };
        let now = at(1, 23, 30);
        let gate = QuietHoursGate::new(Arc::new(lookup), Arc::new(ManualClock::new(now)));

        assert_eq!(gate.plan(unset, now).await, DeliveryPlan::Immediate { at: now });
        assert_eq!(gate.plan(broken, now).await, DeliveryPlan::Immediate { at: now });
    }
}
