//! Notification store implementations.

pub mod memory;
pub mod notification;

pub use memory::MemoryNotificationStore;
pub use notification::PgNotificationStore;
