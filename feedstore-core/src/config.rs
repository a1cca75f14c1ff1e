//! Configuration types

use crate::error::{ConfigError, FeedStoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 16;

/// Largest map size whose byte count fits in `usize`.
pub const MAX_MAP_SIZE_MB: usize = usize::MAX / (1024 * 1024);

/// Default number of read workers in the operation scheduler.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Object schemas the persistence engine must register before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    CacheRecord,
    FeedImageRecord,
}

/// Where the persistence engine keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreLocation {
    /// Durable store rooted at a filesystem directory.
    Persistent { path: PathBuf },
    /// Volatile store shared by every connection opened with the same identifier.
    InMemory { identifier: String },
}

/// Store configuration.
///
/// Fixed for the lifetime of a store; every operation opens its own
/// connection from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfiguration {
    pub location: StoreLocation,
    pub object_types: Vec<Schema>,
    pub map_size_mb: usize,
    pub worker_threads: usize,
}

impl StoreConfiguration {
    /// Schemas the cache store requires the engine to register.
    pub fn required_object_types() -> Vec<Schema> {
        vec![Schema::CacheRecord, Schema::FeedImageRecord]
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::with_location(StoreLocation::Persistent { path: path.into() })
    }

    pub fn in_memory(identifier: impl Into<String>) -> Self {
        Self::with_location(StoreLocation::InMemory {
            identifier: identifier.into(),
        })
    }

    fn with_location(location: StoreLocation) -> Self {
        Self {
            location,
            object_types: Self::required_object_types(),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    pub fn with_object_types(mut self, object_types: Vec<Schema>) -> Self {
        self.object_types = object_types;
        self
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(FeedStoreError::Config) if invalid.
    ///
    /// Validates:
    /// - every required schema is registered
    /// - 0 < map_size_mb <= MAX_MAP_SIZE_MB
    /// - worker_threads > 0
    /// - in-memory identifiers are non-empty
    pub fn validate(&self) -> FeedStoreResult<()> {
        for schema in Self::required_object_types() {
            if !self.object_types.contains(&schema) {
                return Err(ConfigError::MissingSchema { schema }.into());
            }
        }

        if self.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.map_size_mb > MAX_MAP_SIZE_MB {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: format!("must not exceed {MAX_MAP_SIZE_MB}"),
            }
            .into());
        }

        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_threads".to_string(),
                value: self.worker_threads.to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if let StoreLocation::InMemory { identifier } = &self.location {
            if identifier.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "location.identifier".to_string(),
                    value: identifier.clone(),
                    reason: "must not be empty".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
