//! PostgreSQL queue store and persistence.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE upload_queue (
//!     id           UUID PRIMARY KEY,
//!     upload_id    TEXT NOT NULL,
//!     connector_id TEXT NOT NULL,
//!     action       TEXT NOT NULL,
//!     info         JSONB NOT NULL,
//!     state        TEXT NOT NULL,
//!     attempts     INT NOT NULL DEFAULT 0,
//!     error        TEXT,
//!     due_at       TIMESTAMPTZ NOT NULL,
//!     created_at   TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX upload_queue_due ON upload_queue (state, due_at);
//!
//! CREATE TABLE process_state (
//!     key   TEXT PRIMARY KEY,
//!     value JSONB NOT NULL
//! );
//!
//! CREATE TABLE upload_info (
//!     id     TEXT PRIMARY KEY,
//!     info   JSONB NOT NULL,
//!     result JSONB
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use portage_core::{
    ActionType, Error, GetAllOptions, Persistence, QueueItem, QueueOptions, QueueState, QueueStore,
    Result, UploadInfo, UploadResult,
};

/// PostgreSQL implementation of [`QueueStore`].
pub struct PgQueueStore {
    pool: Pool<Postgres>,
    options: QueueOptions,
}

impl PgQueueStore {
    pub fn new(pool: Pool<Postgres>, options: QueueOptions) -> Self {
        Self { pool, options }
    }

    fn state_to_str(state: QueueState) -> &'static str {
        match state {
            QueueState::Pending => "pending",
            QueueState::Dispatched => "dispatched",
            QueueState::Completed => "completed",
            QueueState::ManualIntervention => "manual_intervention",
        }
    }

    fn str_to_state(s: &str) -> QueueState {
        match s {
            "pending" => QueueState::Pending,
            "dispatched" => QueueState::Dispatched,
            "completed" => QueueState::Completed,
            "manual_intervention" => QueueState::ManualIntervention,
            _ => QueueState::Pending, // fallback
        }
    }

    fn str_to_action(s: &str) -> ActionType {
        match s {
            "new" => ActionType::New,
            "update" => ActionType::Update,
            "complete" => ActionType::Complete,
            other => ActionType::Custom(other.to_string()),
        }
    }

    fn parse_item_row(row: sqlx::postgres::PgRow) -> QueueItem {
        let action: String = row.get("action");
        let state: String = row.get("state");
        let info: JsonValue = row.get("info");
        QueueItem {
            id: row.get("id"),
            upload_id: row.get("upload_id"),
            connector_id: row.get("connector_id"),
            action: Self::str_to_action(&action),
            info: serde_json::from_value(info).unwrap_or_default(),
            state: Self::str_to_state(&state),
            attempts: row.get("attempts"),
            error: row.get("error"),
            due_at: row.get("due_at"),
            created_at: row.get("created_at"),
        }
    }
}

const ITEM_COLUMNS: &str =
    "id, upload_id, connector_id, action, info, state, attempts, error, due_at, created_at";

/// Builds the filtered listing query. The parameter index advances only when
/// a condition emits a placeholder, so `$1..$n` always matches the bind order
/// in [`PgQueueStore::get_all`].
fn build_get_all_query(options: &GetAllOptions) -> String {
    let mut conditions = Vec::new();
    let mut next_param = 0;

    if options.id.is_some() {
        next_param += 1;
        conditions.push(format!("id = ${next_param}"));
    }
    if options.connector_id.is_some() {
        next_param += 1;
        conditions.push(format!("connector_id = ${next_param}"));
    }
    if options.action.is_some() {
        next_param += 1;
        conditions.push(format!("action = ${next_param}"));
    }
    if options.due_before.is_some() {
        next_param += 1;
        conditions.push(format!("due_at < ${next_param}"));
    }
    if options.due_after.is_some() {
        next_param += 1;
        conditions.push(format!("due_at > ${next_param}"));
    }
    if options.only_due {
        conditions.push("state = 'pending' AND due_at <= NOW()".to_string());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let limit_clause = if options.limit.is_some() {
        next_param += 1;
        format!("LIMIT ${next_param}")
    } else {
        String::new()
    };

    format!(
        "SELECT {ITEM_COLUMNS} FROM upload_queue
         {where_clause}
         ORDER BY due_at ASC, created_at ASC
         {limit_clause}"
    )
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        upload_id: &str,
        connector_id: &str,
        action: ActionType,
        due_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        // Snapshot the current upload record, falling back to a bare
        // descriptor when none is stored yet.
        let info: JsonValue =
            sqlx::query_scalar("SELECT info FROM upload_info WHERE id = $1")
                .bind(upload_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?
                .unwrap_or_else(|| {
                    serde_json::to_value(UploadInfo {
                        id: upload_id.to_string(),
                        ..UploadInfo::default()
                    })
                    .unwrap_or(JsonValue::Null)
                });

        sqlx::query(
            "INSERT INTO upload_queue (id, upload_id, connector_id, action, info, state, attempts, due_at, created_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7)",
        )
        .bind(id)
        .bind(upload_id)
        .bind(connector_id)
        .bind(action.as_str())
        .bind(&info)
        .bind(due_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn claim_due(
        &self,
        connector_ids: &[String],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        // FOR UPDATE SKIP LOCKED keeps concurrent dispatcher ticks from
        // claiming the same items.
        let query = format!(
            "UPDATE upload_queue
             SET state = 'dispatched'
             WHERE id IN (
                 SELECT id FROM upload_queue
                 WHERE state = 'pending'
                   AND due_at <= $1
                   AND connector_id = ANY($2)
                 ORDER BY due_at ASC, created_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {ITEM_COLUMNS}"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(connector_ids.to_vec())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_item_row).collect())
    }

    async fn get_all(&self, options: GetAllOptions) -> Result<Vec<QueueItem>> {
        // Binds below must stay in the same order as the placeholders
        // emitted by build_get_all_query.
        let query = build_get_all_query(&options);
        let mut q = sqlx::query(&query);
        if let Some(id) = options.id {
            q = q.bind(id);
        }
        if let Some(c) = &options.connector_id {
            q = q.bind(c.clone());
        }
        if let Some(a) = &options.action {
            q = q.bind(a.as_str().to_string());
        }
        if let Some(t) = options.due_before {
            q = q.bind(t);
        }
        if let Some(t) = options.due_after {
            q = q.bind(t);
        }
        if let Some(limit) = options.limit {
            q = q.bind(limit as i64);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_item_row).collect())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE upload_queue SET state = 'completed', error = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_error(
        &self,
        item: &QueueItem,
        message: &str,
        postpone: Option<DateTime<Utc>>,
        backoff: bool,
    ) -> Result<()> {
        if backoff {
            sqlx::query(
                "UPDATE upload_queue SET state = 'manual_intervention', error = $1 WHERE id = $2",
            )
            .bind(message)
            .bind(item.id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            return Ok(());
        }
        sqlx::query(
            "UPDATE upload_queue
             SET state = 'pending', error = $1, attempts = $2, due_at = COALESCE($3, due_at)
             WHERE id = $4",
        )
        .bind(message)
        .bind(item.attempts + 1)
        .bind(postpone)
        .bind(item.id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
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
        let state = if backoff {
            Self::state_to_str(QueueState::ManualIntervention)
        } else {
            Self::state_to_str(QueueState::Pending)
        };
        sqlx::query(
            "UPDATE upload_queue SET due_at = $1, attempts = $2, error = $3, state = $4 WHERE id = $5",
        )
        .bind(due_at)
        .bind(attempts)
        .bind(error)
        .bind(state)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE upload_queue SET state = 'pending' WHERE id = $1 AND state = 'dispatched'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    fn options(&self) -> QueueOptions {
        self.options
    }
}

/// PostgreSQL implementation of [`Persistence`].
pub struct PgPersistence {
    pool: Pool<Postgres>,
}

impl PgPersistence {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Persistence for PgPersistence {
    async fn set_state(&self, key: &str, value: JsonValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO process_state (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<JsonValue>> {
        let value = sqlx::query_scalar("SELECT value FROM process_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(value)
    }

    async fn set_upload_info(&self, info: &UploadInfo) -> Result<()> {
        let json = serde_json::to_value(info)?;
        sqlx::query(
            "INSERT INTO upload_info (id, info) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET info = EXCLUDED.info",
        )
        .bind(&info.id)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_upload_info(&self, id: &str) -> Result<Option<UploadInfo>> {
        let row: Option<JsonValue> =
            sqlx::query_scalar("SELECT info FROM upload_info WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        match row {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }

    async fn set_checksum(&self, upload_id: &str, value: &str, algorithm: &str) -> Result<()> {
        let mut info = self
            .get_upload_info(upload_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
        info.metadata.set(portage_core::keys::CHECKSUM, value);
        info.metadata
            .set(portage_core::keys::CHECKSUM_TYPE, algorithm);
        self.set_upload_info(&info).await
    }

    async fn set_uploaded(&self, upload_id: &str, result: &UploadResult) -> Result<()> {
        let json = serde_json::to_value(result)?;
        let updated = sqlx::query("UPDATE upload_info SET result = $1 WHERE id = $2")
            .bind(&json)
            .bind(upload_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("upload {upload_id}")));
        }
        if let Some(mut info) = self.get_upload_info(upload_id).await? {
            if !result.ext_id.is_empty() {
                info.metadata.set(portage_core::keys::EXT_ID, &result.ext_id);
            }
            if !result.client_id.is_empty() {
                info.metadata.set_client_id(&result.client_id);
            }
            self.set_upload_info(&info).await?;
        }
        Ok(())
    }
}
