//! # portage-core
//!
//! Core types, traits, and abstractions for the portage connector runtime.
//!
//! This crate provides the metadata bag, the canonical upload schema, the
//! queue item model, and the trait seams (queue store, persistence,
//! connector capabilities) the other portage crates build on.

pub mod bag;
pub mod connector;
pub mod defaults;
pub mod error;
pub mod file;
pub mod logging;
pub mod queue;
pub mod schema;

// Re-export commonly used types at crate root
pub use bag::{keys, MetadataBag};
pub use connector::{
    AuthPayload, Authenticator, Connector, ConnectorRegistry, FeatureAnnouncer, Features,
    QueueHandler, RequestMeta, SearchQuery, SearchResult, SearchableEntity, Searcher,
    SupportedValidation, UploadCompleter, UploadInitiator, ValidatePayload, ValidateResponse,
    ValidatedEntity, Validator,
};
pub use error::{Error, Result};
pub use file::safe_filename;
pub use queue::{
    ActionType, BackoffCurve, BackoffPolicy, GetAllOptions, Persistence, QueueItem, QueueOptions,
    QueueState, QueueStore, QueueVerdict, UploadInfo, UploadResult,
};
pub use schema::{
    Annotation, Bookmark, Checksum, Creator, FormField, Gender, Location, Parent, Person,
    UploadRecord, ValidationRule,
};
