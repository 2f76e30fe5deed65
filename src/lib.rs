//! epg-mirror: a caching mirror for a third-party EPG provider
//!
//! The core is the cache-and-synchronization engine: three cooperating
//! background tasks keep an in-memory channel catalog and per-channel
//! schedule store consistent with upstream, merge programs split across
//! midnight, and apply incremental add/delete diffs in order while readers
//! see lock-free immutable snapshots.

pub mod cache;
pub mod config;
pub mod errors;
pub mod merge;
pub mod models;
pub mod refresh;
pub mod sync;
pub mod upstream;
pub mod web;
