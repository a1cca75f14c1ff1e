//! Error types for feedstore operations

use crate::config::Schema;
use thiserror::Error;

/// Persistence engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Mutation attempted outside of a write transaction")]
    NotInTransaction,

    #[error("A cache record already exists; the store holds at most one")]
    SingleSlotViolation,

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Failed to start worker: {reason}")]
    WorkerSpawn { reason: String },
}

/// Errors raised when a persisted feed image cannot be mapped back to the domain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid identifier: {value:?}")]
    InvalidIdentifier { value: String },

    #[error("Invalid URL: {value:?}")]
    InvalidUrl { value: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Schema not registered: {schema:?}")]
    MissingSchema { schema: Schema },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all feedstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedStoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for feedstore operations.
pub type FeedStoreResult<T> = Result<T, FeedStoreError>;

// =============================================================================
// TESTS
// =============================================================================
