//! # casedesk-core
//!
//! Core crate for the CaseDesk notification pipeline. Contains the
//! configuration schema, typed identifiers, the clock abstraction,
//! and the unified error system.
//!
//! This crate has **no** internal dependencies on other CaseDesk crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::AppError;
pub use result::AppResult;
