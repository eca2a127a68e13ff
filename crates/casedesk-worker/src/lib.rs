//! Scheduled work for the CaseDesk notification pipeline.
//!
//! This crate provides:
//! - The queue promoter, which releases notifications held for quiet hours
//! - A job executor that dispatches runs to the correct handler
//! - A cron scheduler that triggers jobs at the configured cadence

pub mod executor;
pub mod jobs;
pub mod scheduler;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use jobs::{PROMOTION_JOB, PromotionReport, QueuePromoter};
pub use scheduler::CronScheduler;
