//! Registry holding at most one poller per user.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use casedesk_core::clock::Clock;
use casedesk_core::config::NotificationsConfig;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_database::store::NotificationStore;

use super::fallback::{NotificationPoller, PollListener, PollerOptions};

/// Owns every user's [`NotificationPoller`].
///
/// Inject one instance into whatever owns user sessions. Each
/// `get_or_create` registers its listener as a consumer; the poller is
/// stopped and discarded when the last consumer is released.
#[derive(Debug)]
pub struct PollerManager {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    default_interval: Duration,
    pollers: DashMap<UserId, Arc<NotificationPoller>>,
}

impl PollerManager {
    /// Create an empty registry.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        default_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            default_interval,
            pollers: DashMap::new(),
        }
    }

    /// Create a registry using the configured poll interval.
    pub fn from_config(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        config: &NotificationsConfig,
    ) -> Self {
        Self::new(store, clock, config.poll_interval())
    }

    /// Return the user's poller, creating it if absent.
    ///
    /// An existing poller keeps its interval and cursor; the listener in
    /// `options` is attached to it. New pollers are not started. Fails
    /// without registering anything when the interval is zero.
    pub fn get_or_create(&self, options: PollerOptions) -> AppResult<Arc<NotificationPoller>> {
        match self.pollers.entry(options.user_id) {
            Entry::Occupied(entry) => {
                let poller = entry.get().clone();
                poller.add_listener(options.listener);
                Ok(poller)
            }
            Entry::Vacant(entry) => {
                let poller = Arc::new(NotificationPoller::new(
                    self.store.clone(),
                    options.user_id,
                    options.interval.unwrap_or(self.default_interval),
                    options.last_check_time.unwrap_or_else(|| self.clock.now()),
                    options.listener,
                )?);
                debug!(user_id = %options.user_id, "Registered notification poller");
                entry.insert(poller.clone());
                Ok(poller)
            }
        }
    }

    /// Current time on the registry's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The user's poller, if registered.
    pub fn get(&self, user_id: UserId) -> Option<Arc<NotificationPoller>> {
        self.pollers.get(&user_id).map(|p| p.value().clone())
    }

    /// Detach one consumer. Stops and removes the poller when it was the
    /// last one; returns whether that happened.
    pub fn release(&self, user_id: UserId, listener: &Arc<dyn PollListener>) -> bool {
        let Entry::Occupied(entry) = self.pollers.entry(user_id) else {
            return false;
        };
        if entry.get().remove_listener(listener) > 0 {
            return false;
        }
        let poller = entry.remove();
        poller.stop();
        debug!(user_id = %user_id, "Last poller consumer released");
        true
    }

    /// Stop and discard the user's poller regardless of consumers.
    pub fn remove(&self, user_id: UserId) -> bool {
        match self.pollers.remove(&user_id) {
            Some((_, poller)) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    /// Number of registered pollers.
    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    /// Whether no poller is registered.
    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    /// Number of registered pollers whose timer is running.
    pub fn active_count(&self) -> usize {
        self.pollers.iter().filter(|p| p.is_running()).count()
    }

    /// Stop and discard every poller.
    pub fn shutdown(&self) {
        let users: Vec<UserId> = self.pollers.iter().map(|p| *p.key()).collect();
        let stopped = users.into_iter().filter(|u| self.remove(*u)).count();
        info!(stopped, "Poller manager shut down");
    }
}
