//! Notification dispatch: recipient resolution, quiet-hours gating and
//! persistence of one row per recipient.

pub mod dispatcher;
pub mod quiet_hours;
pub mod rules;

pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use quiet_hours::{QuietHoursGate, QuietHoursLookup};
pub use rules::{Member, MembershipDirectory, RecipientResolver};
