//! In-memory queue store and persistence.
//!
//! Used by tests and single-process deployments that do not need the
//! durability of the PostgreSQL store. Mutations are serialized behind one
//! async mutex, which also makes `claim_due` atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portage_core::{
    ActionType, Error, GetAllOptions, Persistence, QueueItem, QueueOptions, QueueState, QueueStore,
    Result, UploadInfo, UploadResult,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Non-durable [`QueueStore`].
pub struct MemoryQueueStore {
    items: Mutex<HashMap<Uuid, QueueItem>>,
    options: QueueOptions,
    /// Source for upload snapshots captured at enqueue time.
    persistence: Option<Arc<dyn Persistence>>,
}

impl MemoryQueueStore {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            options,
            persistence: None,
        }
    }

    /// Snapshot upload records from the given persistence when enqueuing.
    pub fn with_persistence(options: QueueOptions, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            options,
            persistence: Some(persistence),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.items.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(
        &self,
        upload_id: &str,
        connector_id: &str,
        action: ActionType,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let info = match &self.persistence {
            Some(p) => p.get_upload_info(upload_id).await?.unwrap_or_else(|| UploadInfo {
                id: upload_id.to_string(),
                ..UploadInfo::default()
            }),
            None => UploadInfo {
                id: upload_id.to_string(),
                ..UploadInfo::default()
            },
        };
        let item = QueueItem {
            id: Uuid::new_v4(),
            upload_id: upload_id.to_string(),
            connector_id: connector_id.to_string(),
            action,
            info,
            state: QueueState::Pending,
            attempts: 0,
            error: None,
            due_at,
            created_at: Utc::now(),
        };
        let id = item.id;
        self.items.lock().await.insert(id, item);
        Ok(id)
    }

    async fn claim_due(
        &self,
        connector_ids: &[String],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let mut items = self.items.lock().await;
        let mut due: Vec<Uuid> = items
            .values()
            .filter(|i| {
                i.state == QueueState::Pending
                    && i.due_at <= now
                    && connector_ids.contains(&i.connector_id)
            })
            .map(|i| i.id)
            .collect();
        due.sort_by_key(|id| {
            let i = &items[id];
            (i.due_at, i.created_at)
        });
        due.truncate(limit);
        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(item) = items.get_mut(&id) {
                item.state = QueueState::Dispatched;
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn get_all(&self, options: GetAllOptions) -> Result<Vec<QueueItem>> {
        let items = self.items.lock().await;
        let now = Utc::now();
        let mut out: Vec<QueueItem> = items
            .values()
            .filter(|i| options.id.map_or(true, |id| i.id == id))
            .filter(|i| {
                options
                    .connector_id
                    .as_ref()
                    .map_or(true, |c| &i.connector_id == c)
            })
            .filter(|i| options.action.as_ref().map_or(true, |a| &i.action == a))
            .filter(|i| options.due_before.map_or(true, |t| i.due_at < t))
            .filter(|i| options.due_after.map_or(true, |t| i.due_at > t))
            .filter(|i| !options.only_due || (i.state == QueueState::Pending && i.due_at <= now))
            .cloned()
            .collect();
        out.sort_by_key(|i| (i.due_at, i.created_at));
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))?;
        item.state = QueueState::Completed;
        item.error = None;
        Ok(())
    }

    async fn mark_error(
        &self,
        item: &QueueItem,
        message: &str,
        postpone: Option<DateTime<Utc>>,
        backoff: bool,
    ) -> Result<()> {
        let mut items = self.items.lock().await;
        let stored = items
            .get_mut(&item.id)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", item.id)))?;
        stored.error = Some(message.to_string());
        if backoff {
            stored.state = QueueState::ManualIntervention;
            return Ok(());
        }
        stored.state = QueueState::Pending;
        stored.attempts = item.attempts + 1;
        if let Some(due) = postpone {
            stored.due_at = due;
        }
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        attempts: i32,
        error: Option<String>,
        backoff: bool,
    ) -> Result<()> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))?;
        item.due_at = due_at;
        item.attempts = attempts;
        item.error = error;
        item.state = if backoff {
            QueueState::ManualIntervention
        } else {
            QueueState::Pending
        };
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))?;
        if item.state == QueueState::Dispatched {
            item.state = QueueState::Pending;
        }
        Ok(())
    }

    fn options(&self) -> QueueOptions {
        self.options
    }
}

/// Non-durable [`Persistence`].
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<HashMap<String, serde_json::Value>>,
    uploads: Mutex<HashMap<String, UploadInfo>>,
    results: Mutex<HashMap<String, UploadResult>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend confirmation recorded for an upload, if any.
    pub async fn uploaded_result(&self, upload_id: &str) -> Option<UploadResult> {
        self.results.lock().await.get(upload_id).cloned()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn set_state(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.state.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn set_upload_info(&self, info: &UploadInfo) -> Result<()> {
        self.uploads
            .lock()
            .await
            .insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn get_upload_info(&self, id: &str) -> Result<Option<UploadInfo>> {
        Ok(self.uploads.lock().await.get(id).cloned())
    }

    async fn set_checksum(&self, upload_id: &str, value: &str, algorithm: &str) -> Result<()> {
        let mut uploads = self.uploads.lock().await;
        let info = uploads
            .get_mut(upload_id)
            .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
        info.metadata.set(portage_core::keys::CHECKSUM, value);
        info.metadata
            .set(portage_core::keys::CHECKSUM_TYPE, algorithm);
        Ok(())
    }

    async fn set_uploaded(&self, upload_id: &str, result: &UploadResult) -> Result<()> {
        self.results
            .lock()
            .await
            .insert(upload_id.to_string(), result.clone());
        if let Some(info) = self.uploads.lock().await.get_mut(upload_id) {
            if !result.ext_id.is_empty() {
                info.metadata.set(portage_core::keys::EXT_ID, &result.ext_id);
            }
            if !result.client_id.is_empty() {
                info.metadata.set_client_id(&result.client_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ids(items: &[QueueItem]) -> Vec<Uuid> {
        items.iter().map(|i| i.id).collect()
    }

    #[tokio::test]
    async fn test_enqueue_and_claim_due() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        let id = store
            .enqueue("up-1", "alpha", ActionType::New, now)
            .await
            .unwrap();

        let claimed = store
            .claim_due(&["alpha".to_string()], now, 10)
            .await
            .unwrap();
        assert_eq!(ids(&claimed), vec![id]);
        assert_eq!(claimed[0].state, QueueState::Dispatched);
    }

    #[tokio::test]
    async fn test_claim_skips_future_items() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        store
            .enqueue("up-1", "alpha", ActionType::New, now + Duration::minutes(5))
            .await
            .unwrap();
        let claimed = store
            .claim_due(&["alpha".to_string()], now, 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        store
            .enqueue("up-1", "alpha", ActionType::New, now)
            .await
            .unwrap();
        let first = store
            .claim_due(&["alpha".to_string()], now, 10)
            .await
            .unwrap();
        let second = store
            .claim_due(&["alpha".to_string()], now, 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_claim_filters_by_connector() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        store
            .enqueue("up-1", "alpha", ActionType::New, now)
            .await
            .unwrap();
        store
            .enqueue("up-2", "beta", ActionType::New, now)
            .await
            .unwrap();
        let claimed = store
            .claim_due(&["beta".to_string()], now, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].connector_id, "beta");
    }

    #[tokio::test]
    async fn test_mark_error_postpones_and_counts_attempt() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        let id = store
            .enqueue("up-1", "alpha", ActionType::Complete, now)
            .await
            .unwrap();
        let item = store.claim_due(&["alpha".to_string()], now, 1).await.unwrap()[0].clone();

        let due = now + Duration::seconds(30);
        store
            .mark_error(&item, "backend timeout", Some(due), false)
            .await
            .unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.state, QueueState::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.due_at, due);
        assert_eq!(stored.error.as_deref(), Some("backend timeout"));
    }

    #[tokio::test]
    async fn test_mark_error_backoff_escalates() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        let id = store
            .enqueue("up-1", "alpha", ActionType::Complete, now)
            .await
            .unwrap();
        let item = store.claim_due(&["alpha".to_string()], now, 1).await.unwrap()[0].clone();

        store
            .mark_error(&item, "permission denied", None, true)
            .await
            .unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.state, QueueState::ManualIntervention);
        // Escalated items are never claimed again.
        let claimed = store
            .claim_due(&["alpha".to_string()], now + Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_release_returns_claim_to_pending() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        let id = store
            .enqueue("up-1", "alpha", ActionType::New, now)
            .await
            .unwrap();
        store.claim_due(&["alpha".to_string()], now, 1).await.unwrap();
        store.release(id).await.unwrap();
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.state, QueueState::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_get_all_only_due_filter() {
        let store = MemoryQueueStore::new(QueueOptions::default());
        let now = Utc::now();
        store
            .enqueue("up-1", "alpha", ActionType::New, now - Duration::seconds(1))
            .await
            .unwrap();
        store
            .enqueue("up-2", "alpha", ActionType::New, now + Duration::minutes(5))
            .await
            .unwrap();
        let due = store
            .get_all(GetAllOptions {
                only_due: true,
                ..GetAllOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].upload_id, "up-1");
    }

    #[tokio::test]
    async fn test_enqueue_snapshots_upload_info() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence
            .set_upload_info(&UploadInfo {
                id: "up-1".into(),
                size: 42,
                is_final: true,
                ..UploadInfo::default()
            })
            .await
            .unwrap();
        let store =
            MemoryQueueStore::with_persistence(QueueOptions::default(), persistence.clone());
        let now = Utc::now();
        let id = store
            .enqueue("up-1", "alpha", ActionType::Complete, now)
            .await
            .unwrap();
        let item = store.get(id).await.unwrap();
        assert_eq!(item.info.size, 42);
        assert!(item.info.is_final);
    }

    #[tokio::test]
    async fn test_set_uploaded_records_result_and_ext_id() {
        let persistence = MemoryPersistence::new();
        persistence
            .set_upload_info(&UploadInfo {
                id: "up-1".into(),
                ..UploadInfo::default()
            })
            .await
            .unwrap();
        persistence
            .set_uploaded(
                "up-1",
                &UploadResult {
                    confirmed: true,
                    ext_id: "EXT-9".into(),
                    ..UploadResult::default()
                },
            )
            .await
            .unwrap();
        let result = persistence.uploaded_result("up-1").await.unwrap();
        assert!(result.confirmed);
        let info = persistence.get_upload_info("up-1").await.unwrap().unwrap();
        assert_eq!(info.metadata.get(portage_core::keys::EXT_ID), "EXT-9");
    }
}
