//! Polling fallback: interval checks that cover gaps in realtime delivery.

pub mod fallback;
pub mod manager;

pub use fallback::{DEFAULT_POLL_INTERVAL, NotificationPoller, PollListener, PollerOptions};
pub use manager::PollerManager;
