//! # casedesk-entity
//!
//! Domain entity models for the CaseDesk notification pipeline. Persisted
//! rows derive `sqlx::FromRow`; value objects (events, quiet-hour windows,
//! change signals) derive `Serialize`/`Deserialize` so they can cross
//! process boundaries.

pub mod notification;

pub use notification::{
    AppModule, ChangeEvent, ChangeKind, DeliveryPlan, DeliveryStatus, NewNotification,
    Notification, NotificationEvent, NotificationPriority, QuietHours, RecipientStrategy,
};
