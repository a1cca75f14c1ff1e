//! Feedstore Storage - Cache Store Implementation
//!
//! A single-slot persistent cache for a feed snapshot, implementing the
//! [`FeedStore`](feedstore_core::FeedStore) contract.
//!
//! # Layers
//!
//! - [`store`]: the [`CacheStore`], which schedules operations and maps results
//! - [`scheduler`]: FIFO ordering with concurrent reads and exclusive mutations
//! - [`mapper`]: domain values to persisted records and back
//! - [`records`]: the persisted record shapes
//! - [`adapter`]: the five-operation connection boundary and its engines
//! - [`completion`]: `async` access to the completion-based contract

pub mod adapter;
pub mod completion;
pub mod mapper;
pub mod records;
pub mod scheduler;
pub mod store;

pub use adapter::{
    EngineConnection, InMemoryConnection, LmdbConnection, PersistenceConnection, UpdatePolicy,
};
pub use completion::FeedStoreExt;
pub use records::{CacheRecord, FeedImageRecord};
pub use scheduler::OperationScheduler;
pub use store::{CacheStore, ConnectionFactory};
