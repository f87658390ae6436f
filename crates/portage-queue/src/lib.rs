//! # portage-queue
//!
//! Durable upload delivery queue: store implementations (in-memory and
//! PostgreSQL) and the polling dispatcher that drives queue items through
//! connector handlers.

pub mod dispatcher;
pub mod memory;
pub mod pg;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherEvent, DispatcherHandle};
pub use memory::{MemoryPersistence, MemoryQueueStore};
pub use pg::{PgPersistence, PgQueueStore};
