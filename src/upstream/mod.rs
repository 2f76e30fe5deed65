//! Upstream EPG provider access
//!
//! Three GET-style calls against the configured provider: the channel
//! catalog, one channel's schedule, and the incremental update stream.
//! Responses are XML documents; anything undersized or structurally
//! unparsable is a fetch failure.

pub mod client;
pub mod parser;
pub mod retry;

pub use client::UpstreamClient;
pub use retry::retry_with_backoff;
