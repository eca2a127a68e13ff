//! # casedesk-database
//!
//! The [`NotificationStore`] contract and its implementations: PostgreSQL
//! (rows plus a `LISTEN`/`NOTIFY` change feed) and an in-memory store for
//! single-process use and tests. Also owns pool setup and migrations.

pub mod connection;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use repositories::{MemoryNotificationStore, PgNotificationStore};
pub use store::{
    ChangeStream, InsertOutcome, NotificationFilter, NotificationStore, PromotionClaim, QueryOrder,
};
