//! Core type definitions used across the CaseDesk workspace.

pub mod id;

pub use id::*;
