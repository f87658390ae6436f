//! Connector capability interfaces.
//!
//! A connector is a backend-specific plugin. Each capability is a separate
//! trait; a [`Connector`] is a tagged set of capability implementations
//! resolved at startup through the [`ConnectorRegistry`]. There is no
//! runtime capability probing: whatever a connector can do is declared when
//! it is registered.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bag::MetadataBag;
use crate::error::{Error, Result};
use crate::queue::{QueueItem, QueueVerdict, UploadInfo, UploadResult};
use crate::schema::UploadRecord;

/// Request metadata forwarded to authentication and validation capabilities.
/// The HTTP layer itself is out of scope; connectors only see headers and
/// the remote address.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HashMap<String, String>,
    pub remote_addr: String,
}

/// Credentials and identity attached to a client request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthPayload {
    pub client_id: String,
    pub api_key: String,
    /// User name in the current backend.
    pub user_name: String,
    /// User ID in the current backend.
    pub user_id: String,
    /// Directory SID, where the deployment uses one.
    pub user_sid: String,
}

impl AuthPayload {
    /// Write the authenticated identity into an upload's metadata bag.
    pub fn apply_to_bag(&self, bag: &mut MetadataBag) {
        if !self.client_id.is_empty() {
            bag.set_client_id(&self.client_id);
        }
        if !self.user_name.is_empty() {
            bag.set_auth_user_name(&self.user_name);
        }
        if !self.user_id.is_empty() {
            bag.set_auth_user_id(&self.user_id);
        }
        if !self.user_sid.is_empty() {
            bag.set_auth_user_sid(&self.user_sid);
        }
    }
}

/// Entities a client asks a connector to validate before submitting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatePayload {
    pub user_id: String,
    pub user_name: String,
    pub sid: String,
    pub parent_id: String,
    pub parent_name: String,
    pub case_id: String,
    pub case_name: String,
    pub group_id: String,
    pub group_name: String,
}

/// Which entity kinds a connector can validate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupportedValidation {
    pub user_id: bool,
    pub user_name: bool,
    pub sid: bool,
    pub parent_id: bool,
    pub parent_name: bool,
    pub case_id: bool,
    pub case_name: bool,
    pub group_id: bool,
    pub group_name: bool,
}

/// A resolved backend entity returned from validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatedEntity {
    pub id: String,
    pub name: String,
}

/// Validation outcome per requested entity. Absent means the connector does
/// not support validating that entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ValidatedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ValidatedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<ValidatedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<ValidatedEntity>,
}

/// Entity kinds a connector's search can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchableEntity {
    User,
    Parent,
    Case,
    Group,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchQuery {
    pub entity: Option<SearchableEntity>,
    pub text: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResult {
    pub entity: Option<SearchableEntity>,
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Upload chunking constraints a connector announces to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub min_chunk_size: i64,
    pub max_chunk_size: i64,
}

/// Called before an upload record is created. An error aborts creation and
/// is surfaced to the client verbatim. Typical uses: creating the parent
/// album/case, extra validation. Mutations to the record are persisted.
#[async_trait]
pub trait UploadInitiator: Send + Sync {
    async fn initiate_new_upload(&self, record: &mut UploadRecord) -> Result<()>;
}

/// Called when the transport marks an upload byte-complete.
#[async_trait]
pub trait UploadCompleter: Send + Sync {
    async fn complete_upload(&self, info: &UploadInfo) -> Result<UploadResult>;
}

/// The retry-driven backend-synchronization callback. A returned error is
/// caught by the dispatcher and treated as a retryable failure.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    fn handler_id(&self) -> &str;

    async fn handle_queue(&self, item: QueueItem) -> Result<QueueVerdict>;
}

/// Gate that runs before any other request handling.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &RequestMeta, auth: &AuthPayload) -> Result<()>;
}

/// Pre-submission input validation against backend-known entities.
#[async_trait]
pub trait Validator: Send + Sync {
    fn supported_validation(&self) -> SupportedValidation;

    async fn validate(
        &self,
        request: &RequestMeta,
        auth: &AuthPayload,
        payload: ValidatePayload,
    ) -> Result<ValidateResponse>;
}

/// Backend entity search.
#[async_trait]
pub trait Searcher: Send + Sync {
    fn searchable_entities(&self) -> Vec<SearchableEntity>;

    async fn search(&self, auth: &AuthPayload, query: SearchQuery) -> Result<Vec<SearchResult>>;
}

/// Announces upload chunking constraints.
pub trait FeatureAnnouncer: Send + Sync {
    fn announce_features(&self) -> Features;
}

/// A named, tagged set of capability implementations for one backend.
#[derive(Clone, Default)]
pub struct Connector {
    id: String,
    pub initiator: Option<Arc<dyn UploadInitiator>>,
    pub completer: Option<Arc<dyn UploadCompleter>>,
    pub queue_handler: Option<Arc<dyn QueueHandler>>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub validator: Option<Arc<dyn Validator>>,
    pub searcher: Option<Arc<dyn Searcher>>,
    pub features: Option<Arc<dyn FeatureAnnouncer>>,
}

impl Connector {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_initiator(mut self, c: Arc<dyn UploadInitiator>) -> Self {
        self.initiator = Some(c);
        self
    }

    pub fn with_completer(mut self, c: Arc<dyn UploadCompleter>) -> Self {
        self.completer = Some(c);
        self
    }

    pub fn with_queue_handler(mut self, c: Arc<dyn QueueHandler>) -> Self {
        self.queue_handler = Some(c);
        self
    }

    pub fn with_authenticator(mut self, c: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(c);
        self
    }

    pub fn with_validator(mut self, c: Arc<dyn Validator>) -> Self {
        self.validator = Some(c);
        self
    }

    pub fn with_searcher(mut self, c: Arc<dyn Searcher>) -> Self {
        self.searcher = Some(c);
        self
    }

    pub fn with_features(mut self, c: Arc<dyn FeatureAnnouncer>) -> Self {
        self.features = Some(c);
        self
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("initiator", &self.initiator.is_some())
            .field("completer", &self.completer.is_some())
            .field("queue_handler", &self.queue_handler.is_some())
            .field("authenticator", &self.authenticator.is_some())
            .field("validator", &self.validator.is_some())
            .field("searcher", &self.searcher.is_some())
            .field("features", &self.features.is_some())
            .finish()
    }
}

/// Startup-resolved registry of connectors, keyed by connector ID.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Connector>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector. Registering the same ID twice is a
    /// configuration error.
    pub fn register(&mut self, connector: Connector) -> Result<()> {
        let id = connector.id().to_string();
        if id.is_empty() {
            return Err(Error::Config("connector id must not be empty".into()));
        }
        if self.connectors.contains_key(&id) {
            return Err(Error::Config(format!(
                "connector '{id}' is already registered"
            )));
        }
        self.connectors.insert(id, connector);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Connector> {
        self.connectors.get(id)
    }

    /// Queue handler for a connector, if it has that capability.
    pub fn queue_handler(&self, id: &str) -> Option<Arc<dyn QueueHandler>> {
        self.connectors.get(id)?.queue_handler.clone()
    }

    /// IDs of every connector that can handle queue items.
    pub fn queue_handler_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connectors
            .values()
            .filter(|c| c.queue_handler.is_some())
            .map(|c| c.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
