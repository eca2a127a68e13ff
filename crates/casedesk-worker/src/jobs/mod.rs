//! Scheduled job handlers.

pub mod promotion;

pub use promotion::{PROMOTION_JOB, PromotionReport, QueuePromoter};
