//! Error type definitions for the EPG mirror
//!
//! The taxonomy mirrors how failures are handled: transient and malformed
//! fetches are retried, lock timeouts abandon the current write cycle, and
//! diff parse failures skip a single channel. None of them is fatal once the
//! service is running; only configuration errors at startup are.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Cache synchronization errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration errors (fatal at startup only)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failures of a single upstream request
#[derive(Error, Debug)]
pub enum FetchError {
    /// Timeout or connection failure; retried with backoff
    #[error("Transient fetch failure: {url} - {message}")]
    Transient { url: String, message: String },

    /// Undersized or structurally unparsable response body
    #[error("Malformed response: {url} - {message}")]
    Malformed { url: String, message: String },
}

/// Failures of the cache write path
#[derive(Error, Debug)]
pub enum SyncError {
    /// Write guard not acquired within its bounded wait
    #[error("Lock timeout after {waited_ms}ms acquiring write guard for {operation}")]
    LockTimeout { operation: String, waited_ms: u64 },

    /// A channel's diff group could not be interpreted
    #[error("Diff parse failure for channel {channel_id} at cursor {cursor}: {message}")]
    DiffParse {
        channel_id: String,
        cursor: u64,
        message: String,
    },

    /// A diff targets a channel with no cached schedule document
    #[error("No cached schedule for channel {channel_id}")]
    ScheduleUnavailable { channel_id: String },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl FetchError {
    /// Classify a reqwest failure. Everything the client surfaces as an
    /// error (timeout, connect, body read) is transient from our side.
    pub fn transient<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Transient {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Malformed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Both variants are retried; the distinction only affects logging.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl SyncError {
    /// Create a lock timeout error
    pub fn lock_timeout<O: Into<String>>(operation: O, waited_ms: u64) -> Self {
        Self::LockTimeout {
            operation: operation.into(),
            waited_ms,
        }
    }

    /// Create a diff parse error
    pub fn diff_parse<C: Into<String>, M: Into<String>>(
        channel_id: C,
        cursor: u64,
        message: M,
    ) -> Self {
        Self::DiffParse {
            channel_id: channel_id.into(),
            cursor,
            message: message.into(),
        }
    }
}
