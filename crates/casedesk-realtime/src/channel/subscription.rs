//! Subscription handle over a recipient's change stream.
//!
//! Delivery is best effort. When the underlying transport drops, the
//! stream ends and the subscription goes quiet; the polling fallback
//! covers that gap.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_database::store::NotificationStore;
use casedesk_entity::notification::ChangeEvent;

/// Opens per-user subscriptions against a [`NotificationStore`].
#[derive(Debug, Clone)]
pub struct RealtimeChannel {
    store: Arc<dyn NotificationStore>,
}

impl RealtimeChannel {
    /// Create a channel over `store`.
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Invoke `on_change` for every insert or update of `user_id`'s rows
    /// until the returned handle is unsubscribed or dropped.
    pub async fn subscribe<F>(&self, user_id: UserId, on_change: F) -> AppResult<RealtimeSubscription>
    where
        F: Fn(ChangeEvent) + Send + 'static,
    {
        let mut changes = self.store.subscribe(user_id).await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = changes.next() => match next {
                        Some(event) => on_change(event),
                        None => {
                            warn!(user_id = %user_id, "Realtime change stream ended");
                            break;
                        }
                    },
                }
            }
            debug!(user_id = %user_id, "Realtime subscription released");
        });

        info!(user_id = %user_id, "Realtime subscription opened");
        Ok(RealtimeSubscription {
            user_id,
            cancel,
            task: Some(task),
        })
    }
}

/// Live subscription. Dropping it cancels the listener;
/// [`unsubscribe`](Self::unsubscribe) also waits for the release.
#[derive(Debug)]
pub struct RealtimeSubscription {
    user_id: UserId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    /// The subscribed user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Whether the listener is still receiving changes.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the listener and wait until the store subscription is released.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(user_id = %self.user_id, error = %e, "Realtime listener task failed");
            }
        }
        info!(user_id = %self.user_id, "Realtime subscription closed");
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
