//! Shared fixtures for pipeline integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;

use casedesk_core::clock::ManualClock;
use casedesk_core::config::NotificationsConfig;
use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{CaseId, FirmId, UserId};
use casedesk_database::MemoryNotificationStore;
use casedesk_entity::notification::QuietHours;
use casedesk_realtime::{ModuleCounts, PollListener, PollerManager};
use casedesk_service::{
    Member, MembershipDirectory, NotificationDispatcher, QuietHoursGate, QuietHoursLookup,
    RecipientResolver,
};
use casedesk_worker::{JobExecutor, QueuePromoter};

/// Firm, case and assignment membership held in memory.
#[derive(Debug, Default)]
pub struct Directory {
    pub teams: HashMap<FirmId, Vec<Member>>,
    pub cases: HashMap<CaseId, Vec<UserId>>,
    pub assignees: HashMap<String, Vec<UserId>>,
}

#[async_trait]
impl MembershipDirectory for Directory {
    async fn team_members(&self, firm_id: FirmId) -> AppResult<Vec<Member>> {
        Ok(self.teams.get(&firm_id).cloned().unwrap_or_default())
    }

    async fn case_participants(&self, case_id: CaseId) -> AppResult<Vec<UserId>> {
        Ok(self.cases.get(&case_id).cloned().unwrap_or_default())
    }

    async fn assignees(&self, reference_id: &str) -> AppResult<Vec<UserId>> {
        Ok(self.assignees.get(reference_id).cloned().unwrap_or_default())
    }
}

/// Per-user quiet-hours preferences.
#[derive(Debug, Default)]
pub struct Preferences {
    pub windows: HashMap<UserId, QuietHours>,
    pub unavailable: bool,
}

#[async_trait]
impl QuietHoursLookup for Preferences {
    async fn quiet_hours(&self, user_id: UserId) -> AppResult<Option<QuietHours>> {
        if self.unavailable {
            return Err(AppError::database("preferences unavailable"));
        }
        Ok(self.windows.get(&user_id).copied())
    }
}

/// Every pipeline component wired to one in-memory store and one clock.
pub struct Pipeline {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryNotificationStore>,
    pub dispatcher: NotificationDispatcher,
    pub promoter: Arc<QueuePromoter>,
    pub executor: Arc<JobExecutor>,
    pub pollers: Arc<PollerManager>,
}

impl Pipeline {
    pub fn new(directory: Directory, preferences: Preferences, now: DateTime<Utc>) -> Self {
        Self::with_config(directory, preferences, now, &NotificationsConfig::default())
    }

    pub fn with_config(
        directory: Directory,
        preferences: Preferences,
        now: DateTime<Utc>,
        config: &NotificationsConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryNotificationStore::from_config(config, clock.clone()));

        let resolver = RecipientResolver::from_config(Arc::new(directory), config);
        let gate = QuietHoursGate::new(Arc::new(preferences), clock.clone());
        let dispatcher = NotificationDispatcher::new(resolver, gate, store.clone());

        let promoter = Arc::new(QueuePromoter::new(
            store.clone(),
            clock.clone(),
            config.promotion_batch_size,
        ));
        let mut executor = JobExecutor::new();
        executor.register(promoter.clone());

        let pollers = Arc::new(PollerManager::from_config(store.clone(), clock.clone(), config));

        Self {
            clock,
            store,
            dispatcher,
            promoter,
            executor: Arc::new(executor),
            pollers,
        }
    }
}

/// Records every poll outcome it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    reports: Mutex<Vec<usize>>,
    errors: Mutex<usize>,
}

impl RecordingListener {
    pub fn reports(&self) -> Vec<usize> {
        self.reports.lock().unwrap().clone()
    }

    pub fn reported_rows(&self) -> usize {
        self.reports().iter().sum()
    }

    pub fn errors(&self) -> usize {
        *self.errors.lock().unwrap()
    }
}

impl PollListener for RecordingListener {
    fn on_new_notifications(&self, _user_id: UserId, count: usize) {
        self.reports.lock().unwrap().push(count);
    }

    fn on_error(&self, _user_id: UserId, _error: &AppError) {
        *self.errors.lock().unwrap() += 1;
    }
}

/// 2024-03-`d` `h`:`m` UTC.
pub fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
}

/// Quiet hours 22:00 to 07:00 in `tz`.
pub fn overnight(tz: Tz) -> QuietHours {
    QuietHours::new(
        NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        tz,
    )
}

/// Wait until the watched counts satisfy `pred`, failing after a second.
pub async fn wait_for_counts(
    watcher: &mut watch::Receiver<ModuleCounts>,
    pred: impl Fn(&ModuleCounts) -> bool,
) -> ModuleCounts {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            {
                let counts = watcher.borrow_and_update();
                if pred(&counts) {
                    return counts.clone();
                }
            }
            watcher.changed().await.expect("aggregator dropped");
        }
    })
    .await
    .expect("counts never reached the expected state")
}
