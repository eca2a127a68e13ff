//! Realtime delivery channel: per-user subscription to store mutations.

pub mod subscription;

pub use subscription::{RealtimeChannel, RealtimeSubscription};
