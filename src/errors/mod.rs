//! Error types for the EPG mirror

pub mod types;

pub use types::{AppError, FetchError, SyncError};
