//! A signed-in user's notification session: realtime subscription, polling
//! fallback and module counts, torn down together.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_database::store::NotificationStore;

use crate::aggregator::{ModuleAggregator, ModuleCounts};
use crate::channel::{RealtimeChannel, RealtimeSubscription};
use crate::poller::{PollListener, PollerManager, PollerOptions};

const SIGNAL_BUFFER: usize = 32;

/// "Something changed, go re-read." Carries no notification payload, so
/// the two channels reporting the same row cannot double-count it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// Pushed by the realtime channel.
    Realtime,
    /// Reported by the polling fallback.
    Poll,
}

struct SignalForwarder {
    tx: mpsc::Sender<SyncSignal>,
}

impl PollListener for SignalForwarder {
    fn on_new_notifications(&self, _user_id: UserId, _count: usize) {
        // A full queue already guarantees a pending refresh.
        let _ = self.tx.try_send(SyncSignal::Poll);
    }
}

/// Owns every background resource serving one user's notification UI.
///
/// Signals from both channels feed one queue; a burst of signals results in
/// a single aggregator refresh. [`close`](Self::close) leaves no timer or
/// subscription behind. Dropping the session without closing it cancels
/// the same resources without waiting for them.
pub struct NotificationSession {
    user_id: UserId,
    aggregator: Arc<ModuleAggregator>,
    pollers: Arc<PollerManager>,
    listener: Arc<dyn PollListener>,
    realtime: Option<RealtimeSubscription>,
    cancel: CancellationToken,
    refresher: Option<JoinHandle<()>>,
    closed: bool,
}

impl std::fmt::Debug for NotificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSession")
            .field("user_id", &self.user_id)
            .field("realtime", &self.realtime)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl NotificationSession {
    /// Subscribe to realtime changes, load initial counts and start the
    /// user's poller.
    ///
    /// The subscription is live and the poller cursor is fixed before the
    /// initial load, so a row written while the session opens is either
    /// in that load or signalled afterwards. A realtime subscription
    /// failure is logged and the session runs on polling alone.
    pub async fn open(
        user_id: UserId,
        store: Arc<dyn NotificationStore>,
        pollers: Arc<PollerManager>,
    ) -> AppResult<Self> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let aggregator = Arc::new(ModuleAggregator::new(user_id, store.clone()));

        let realtime_tx = tx.clone();
        let realtime = match RealtimeChannel::new(store)
            .subscribe(user_id, move |_| {
                let _ = realtime_tx.try_send(SyncSignal::Realtime);
            })
            .await
        {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Realtime unavailable, relying on polling");
                None
            }
        };

        let opened_at = pollers.now();
        if let Err(e) = aggregator.refresh().await {
            warn!(user_id = %user_id, error = %e, "Initial module count load failed");
        }

        let listener: Arc<dyn PollListener> = Arc::new(SignalForwarder { tx });
        let options = PollerOptions::new(user_id, listener.clone()).since(opened_at);
        let poller = match pollers.get_or_create(options) {
            Ok(poller) => poller,
            Err(e) => {
                if let Some(subscription) = realtime {
                    subscription.unsubscribe().await;
                }
                return Err(e);
            }
        };
        poller.start();

        let cancel = CancellationToken::new();
        let refresher = tokio::spawn(run_refresher(aggregator.clone(), rx, cancel.clone()));

        info!(user_id = %user_id, realtime = realtime.is_some(), "Notification session opened");
        Ok(Self {
            user_id,
            aggregator,
            pollers,
            listener,
            realtime,
            cancel,
            refresher: Some(refresher),
            closed: false,
        })
    }

    /// The session's user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The session's aggregator.
    pub fn aggregator(&self) -> &Arc<ModuleAggregator> {
        &self.aggregator
    }

    /// The latest module counts.
    pub fn counts(&self) -> ModuleCounts {
        self.aggregator.counts()
    }

    /// Watch module counts. UI effects (badges, sounds) should key off count
    /// changes here, not off individual channel signals.
    pub fn watch_counts(&self) -> watch::Receiver<ModuleCounts> {
        self.aggregator.watch()
    }

    /// Whether the realtime subscription is still delivering.
    pub fn realtime_active(&self) -> bool {
        self.realtime.as_ref().is_some_and(|s| s.is_active())
    }

    /// Release the realtime subscription and the poller lease, and wait for
    /// the refresh task to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(subscription) = self.realtime.take() {
            subscription.unsubscribe().await;
        }
        self.pollers.release(self.user_id, &self.listener);
        if let Some(task) = self.refresher.take() {
            if let Err(e) = task.await {
                warn!(user_id = %self.user_id, error = %e, "Refresh task failed");
            }
        }
        self.closed = true;
        info!(user_id = %self.user_id, "Notification session closed");
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.cancel.cancel();
        self.realtime.take();
        self.pollers.release(self.user_id, &self.listener);
        debug!(user_id = %self.user_id, "Notification session dropped without close");
    }
}

async fn run_refresher(
    aggregator: Arc<ModuleAggregator>,
    mut rx: mpsc::Receiver<SyncSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = rx.recv() => signal,
        };
        let Some(signal) = signal else {
            break;
        };

        let mut coalesced = 1usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        trace!(?signal, coalesced, "Refreshing module counts");

        if let Err(e) = aggregator.refresh().await {
            warn!(error = %e, "Module count refresh failed");
        }
    }
}
