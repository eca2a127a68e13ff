//! Convenience result type alias for CaseDesk.

use crate::error::AppError;

/// A specialized `Result` type for CaseDesk operations.
pub type AppResult<T> = Result<T, AppError>;
