//! Centralized default constants for the portage runtime.
//!
//! This module is the single source of truth for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// QUEUE
// =============================================================================

/// Polling interval of the queue dispatcher in milliseconds.
pub const QUEUE_POLL_INTERVAL_MS: u64 = 5_000;

/// Base postponement applied after the first retryable failure, in seconds.
/// Later attempts scale this by the configured backoff curve.
pub const QUEUE_POSTPONE_BASE_SECS: u64 = 30;

/// Automatic attempts before an item escalates to manual intervention.
pub const QUEUE_MAX_ATTEMPTS: i32 = 10;

/// Maximum queue items processed concurrently within one dispatcher tick.
pub const DISPATCH_MAX_CONCURRENT: usize = 4;

/// Capacity of the dispatcher event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// UPLOADS
// =============================================================================

/// Recommended minimum chunk size announced to clients, in bytes (6 MB).
pub const MIN_CHUNK_SIZE: i64 = 6 * 1024 * 1024;

/// Default maximum chunk size announced to clients, in bytes (64 MB).
pub const MAX_CHUNK_SIZE: i64 = 64 * 1024 * 1024;
