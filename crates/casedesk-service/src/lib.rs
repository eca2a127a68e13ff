//! # casedesk-service
//!
//! Turns normalized business events into notification rows. The
//! [`NotificationDispatcher`] resolves recipients, asks the quiet-hours
//! gate whether each should be delivered now or held, and writes the rows
//! through a [`NotificationStore`](casedesk_database::NotificationStore).
//!
//! Membership and preference data are supplied by the host application
//! through [`MembershipDirectory`] and [`QuietHoursLookup`].

pub mod notification;

pub use notification::{
    DispatchReport, Member, MembershipDirectory, NotificationDispatcher, QuietHoursGate,
    QuietHoursLookup, RecipientResolver,
};
