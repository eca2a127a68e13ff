//! # casedesk-realtime
//!
//! Client-side delivery of notifications:
//!
//! - [`RealtimeChannel`]: best-effort push of store mutations per user
//! - [`NotificationPoller`] / [`PollerManager`]: interval fallback with a
//!   monotonic cursor, one poller per user
//! - [`ModuleAggregator`]: unread counts per UI module
//! - [`NotificationSession`]: ties the three together for a signed-in user
//!   and tears them down as a unit

pub mod aggregator;
pub mod channel;
pub mod poller;
pub mod session;

pub use aggregator::{ModuleAggregator, ModuleCounts};
pub use channel::{RealtimeChannel, RealtimeSubscription};
pub use poller::{NotificationPoller, PollListener, PollerManager, PollerOptions};
pub use session::{NotificationSession, SyncSignal};
