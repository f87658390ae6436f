//! Queue item model, backoff policy, and the store/persistence traits the
//! dispatcher runs against.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bag::MetadataBag;
use crate::defaults;
use crate::error::Result;

/// Snapshot of the transport's native upload record, as needed to act on a
/// queue item. The transport owns byte storage; this is only the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadInfo {
    /// Opaque transport-assigned upload ID.
    pub id: String,
    /// Total declared size in bytes.
    pub size: i64,
    /// Bytes received so far.
    pub offset: i64,
    /// Whether the transport has marked the upload byte-complete.
    pub is_final: bool,
    pub metadata: MetadataBag,
    /// Transport storage details (bucket, key, ...), opaque to the core.
    pub storage: HashMap<String, String>,
}

/// The kind of backend synchronization a queue item requests, from the
/// responsible connector's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// A new upload was created and must be announced to the backend.
    New,
    /// Metadata changed on an existing upload.
    Update,
    /// The upload is byte-complete and must be delivered.
    Complete,
    /// Connector-defined action.
    #[serde(untagged)]
    Custom(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::New => "new",
            ActionType::Update => "update",
            ActionType::Complete => "complete",
            ActionType::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a queue item.
///
/// `Pending` items become eligible when due. `Dispatched` marks an in-flight
/// handler invocation; the dispatcher never selects a dispatched item again
/// until the verdict lands. `ManualIntervention` is terminal for automatic
/// processing and requires an operator to re-enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Pending,
    Dispatched,
    Completed,
    ManualIntervention,
}

/// One pending unit of backend-synchronization work tied to an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub upload_id: String,
    /// The connector responsible for this item.
    pub connector_id: String,
    pub action: ActionType,
    /// Snapshot of the upload at enqueue time.
    pub info: UploadInfo,
    pub state: QueueState,
    /// How many dispatch attempts this item has been through.
    pub attempts: i32,
    /// Last handler error, kept for operator visibility.
    pub error: Option<String>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Verdict returned by a connector's queue handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueVerdict {
    /// The work is done; remove the item from the active queue.
    CompleteItem,
    /// The backend confirmed the upload. Completes the item and marks the
    /// parent upload as externally confirmed with the returned identifiers.
    CompleteUpload(UploadResult),
    /// Stop automatic retries and escalate to manual intervention.
    Backoff(String),
    /// Transient failure; postpone and try again.
    Retry(String),
}

/// Confirmation details a backend returns for a completed upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadResult {
    pub confirmed: bool,
    /// External ID of the file on the backend.
    pub ext_id: String,
    pub case_id: String,
    pub external_parent_id: String,
    pub client_id: String,
}

/// Growth curve for retry postponement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffCurve {
    /// `base * attempts`
    Linear,
    /// `base * 2^(attempts - 1)`
    Exponential,
}

/// Deployment-configured retry policy. The postponement is monotonically
/// non-decreasing in the attempt count; reaching `max_attempts` forces the
/// item into manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub curve: BackoffCurve,
    pub max_attempts: i32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(defaults::QUEUE_POSTPONE_BASE_SECS),
            curve: BackoffCurve::Linear,
            max_attempts: defaults::QUEUE_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Postponement for the given attempt count (1-based: the delay applied
    /// after the n-th failed attempt).
    pub fn postpone_for(&self, attempts: i32) -> Duration {
        let n = attempts.max(1) as u32;
        match self.curve {
            BackoffCurve::Linear => self.base.saturating_mul(n),
            BackoffCurve::Exponential => self.base.saturating_mul(2u32.saturating_pow(n - 1)),
        }
    }

    /// Whether the attempt count has exhausted the automatic retry budget.
    pub fn exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Store-level queue configuration handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueOptions {
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(defaults::QUEUE_POLL_INTERVAL_MS),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Filter for listing queue items.
#[derive(Debug, Clone, Default)]
pub struct GetAllOptions {
    pub id: Option<Uuid>,
    pub connector_id: Option<String>,
    pub action: Option<ActionType>,
    pub due_before: Option<DateTime<Utc>>,
    pub due_after: Option<DateTime<Utc>>,
    /// Only items currently eligible for dispatch (pending and due).
    pub only_due: bool,
    pub limit: Option<usize>,
}

/// Contract of the single authoritative queue store.
///
/// All mutations to one item are serialized by the store; `claim_due` must
/// atomically flip selected items to `Dispatched` so a concurrent dispatcher
/// tick cannot re-claim them.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create a pending item for an upload event.
    async fn enqueue(
        &self,
        upload_id: &str,
        connector_id: &str,
        action: ActionType,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid>;

    /// Atomically claim pending items that are due for the given connectors,
    /// marking them dispatched. At most `limit` items are returned.
    async fn claim_due(
        &self,
        connector_ids: &[String],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>>;

    /// List items matching a filter, without claiming them.
    async fn get_all(&self, options: GetAllOptions) -> Result<Vec<QueueItem>>;

    /// Mark an item completed.
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Record a handler failure. With `postpone` set the item returns to
    /// pending at the given due time with its attempt count incremented;
    /// with `backoff` set it escalates to manual intervention instead.
    async fn mark_error(
        &self,
        item: &QueueItem,
        message: &str,
        postpone: Option<DateTime<Utc>>,
        backoff: bool,
    ) -> Result<()>;

    /// Atomically rewrite scheduling state for an item.
    async fn update(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        attempts: i32,
        error: Option<String>,
        backoff: bool,
    ) -> Result<()>;

    /// Return a dispatched item to pending without counting an attempt.
    /// Used when shutting down with claims that were never processed.
    async fn release(&self, id: Uuid) -> Result<()>;

    fn options(&self) -> QueueOptions;
}

/// Persistence contract for process state and transport records, consumed by
/// the metadata layer and the dispatcher's completion path.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Store an opaque piece of process state.
    async fn set_state(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Fetch an opaque piece of process state.
    async fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store the transport's upload record.
    async fn set_upload_info(&self, info: &UploadInfo) -> Result<()>;

    /// Fetch the transport's upload record by ID.
    async fn get_upload_info(&self, id: &str) -> Result<Option<UploadInfo>>;

    /// Store a checksum computed for an upload.
    async fn set_checksum(&self, upload_id: &str, value: &str, algorithm: &str) -> Result<()>;

    /// Mark an upload externally confirmed, recording the backend's
    /// identifiers on its metadata.
    async fn set_uploaded(&self, upload_id: &str, result: &UploadResult) -> Result<()>;
}
