//! Per-module unread counts for the UI shell.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_database::store::{NotificationFilter, NotificationStore, QueryOrder};
use casedesk_entity::notification::AppModule;

/// Unread count per module. Every module is present, zero included.
pub type ModuleCounts = BTreeMap<AppModule, usize>;

fn zeroed() -> ModuleCounts {
    AppModule::ALL.iter().map(|m| (*m, 0)).collect()
}

/// Classifies a user's unread, delivered notifications into module buckets.
///
/// Every refresh rescans the store, so the published counts always equal
/// the unread set at the time of the last successful refresh.
#[derive(Debug)]
pub struct ModuleAggregator {
    user_id: UserId,
    store: Arc<dyn NotificationStore>,
    counts: watch::Sender<ModuleCounts>,
}

impl ModuleAggregator {
    /// Create an aggregator with all counts at zero.
    pub fn new(user_id: UserId, store: Arc<dyn NotificationStore>) -> Self {
        Self {
            user_id,
            store,
            counts: watch::Sender::new(zeroed()),
        }
    }

    /// Recompute every count from the store and publish the result.
    ///
    /// On error the previous counts stay published.
    pub async fn refresh(&self) -> AppResult<ModuleCounts> {
        let filter = NotificationFilter::for_recipient(self.user_id).unread_delivered();
        let rows = self
            .store
            .query(&filter, QueryOrder::CreatedAtDesc, None)
            .await?;

        let mut counts = zeroed();
        let mut unclassified = 0usize;
        for row in &rows {
            match AppModule::classify(&row.notification_type) {
                Some(module) => *counts.entry(module).or_default() += 1,
                None => unclassified += 1,
            }
        }

        debug!(
            user_id = %self.user_id,
            unread = rows.len(),
            unclassified,
            "Module counts refreshed"
        );
        self.counts.send_replace(counts.clone());
        Ok(counts)
    }

    /// The latest published counts.
    pub fn counts(&self) -> ModuleCounts {
        self.counts.borrow().clone()
    }

    /// The latest count for one module.
    pub fn count(&self, module: AppModule) -> usize {
        self.counts.borrow().get(&module).copied().unwrap_or(0)
    }

    /// Sum over all modules.
    pub fn total(&self) -> usize {
        self.counts.borrow().values().sum()
    }

    /// Watch published counts.
    pub fn watch(&self) -> watch::Receiver<ModuleCounts> {
        self.counts.subscribe()
    }
}
