//! Notification domain entities.

pub mod change;
pub mod event;
pub mod model;
pub mod module;
pub mod quiet_hours;
pub mod status;

pub use change::{ChangeEvent, ChangeKind};
pub use event::{NotificationEvent, RecipientStrategy};
pub use model::{DeliveryPlan, NewNotification, Notification};
pub use module::AppModule;
pub use quiet_hours::QuietHours;
pub use status::{DeliveryStatus, NotificationPriority};
