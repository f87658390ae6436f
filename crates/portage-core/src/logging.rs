//! Structured logging field name constants for portage.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from the client request through queue items.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "bag", "schema", "mapping", "queue", "dispatcher"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "map_form_fields", "claim_due", "handle_queue"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Transport-assigned upload ID.
pub const UPLOAD_ID: &str = "upload_id";

/// Queue item UUID being processed.
pub const ITEM_ID: &str = "item_id";

/// Connector responsible for the current operation.
pub const CONNECTOR_ID: &str = "connector_id";

/// Queue action type.
pub const ACTION: &str = "action";

/// Source key of a field-mapping rule.
pub const FIELD_KEY: &str = "field_key";

/// Canonical target path of a field-mapping rule.
pub const TARGET_FIELD: &str = "target_field";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt count of a queue item.
pub const ATTEMPTS: &str = "attempts";

/// Number of items claimed in a dispatcher tick.
pub const CLAIMED: &str = "claimed";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
