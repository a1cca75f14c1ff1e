//! Engine selection from a store configuration.

use feedstore_core::{FeedStoreResult, StorageError, StoreConfiguration, StoreLocation};

use super::{
    Connection, LmdbEngine, MemoryEngine, NotificationToken, StorageEngine, StoredObject,
    WriteSet,
};
use crate::records::CacheRecord;

/// The engine a [`StoreConfiguration`] points at.
#[derive(Debug, Clone)]
pub enum StoreEngine {
    Lmdb(LmdbEngine),
    InMemory(MemoryEngine),
}

/// Connection opened from a [`StoreConfiguration`].
pub type EngineConnection = Connection<StoreEngine>;

impl StoreEngine {
    /// Validate `config` and attach to the engine it describes.
    pub fn open(config: &StoreConfiguration) -> FeedStoreResult<Self> {
        config.validate()?;
        let engine = match &config.location {
            StoreLocation::Persistent { path } => StoreEngine::Lmdb(
                LmdbEngine::open(path, config.map_size_mb).map_err(StorageError::from)?,
            ),
            StoreLocation::InMemory { identifier } => {
                StoreEngine::InMemory(MemoryEngine::open(identifier)?)
            }
        };
        Ok(engine)
    }
}

macro_rules! delegate {
    ($engine:expr, $inner:ident => $call:expr) => {
        match $engine {
            StoreEngine::Lmdb($inner) => $call,
            StoreEngine::InMemory($inner) => $call,
        }
    };
}

impl StorageEngine for StoreEngine {
    fn load(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError> {
        delegate!(self, engine => engine.load())
    }

    fn transact<R, F>(
        &self,
        without_notifying: &[NotificationToken],
        stage: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(Vec<StoredObject<CacheRecord>>) -> Result<(R, WriteSet), StorageError>,
    {
        delegate!(self, engine => engine.transact(without_notifying, stage))
    }

    fn version(&self) -> Result<u64, StorageError> {
        delegate!(self, engine => engine.version())
    }

    fn begin(&self) -> Result<(), StorageError> {
        delegate!(self, engine => engine.begin())
    }

    fn observe(
        &self,
        observer: Box<dyn Fn() + Send + Sync>,
    ) -> Result<NotificationToken, StorageError> {
        delegate!(self, engine => engine.observe(observer))
    }

    fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError> {
        delegate!(self, engine => engine.unobserve(token))
    }
}

impl Connection<StoreEngine> {
    /// Open a connection onto the engine described by `config`.
    ///
    /// An invalid configuration or an engine that cannot be opened yields
    /// the same error on every call.
    pub fn open(config: &StoreConfiguration) -> FeedStoreResult<Self> {
        Ok(Connection::new(StoreEngine::open(config)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{PersistenceConnection, UpdatePolicy};
    use chrono::Utc;
    use feedstore_core::{ConfigError, FeedStoreError, Schema};
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_configuration_opens_memory_engine() {
        let config = StoreConfiguration::in_memory(format!("engine-{}", uuid::Uuid::new_v4()));
        let connection = EngineConnection::open(&config).expect("open should succeed");
        assert!(matches!(connection.engine(), StoreEngine::InMemory(_)));
    }

    #[test]
    fn test_persistent_configuration_opens_lmdb_engine() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = StoreConfiguration::persistent(temp_dir.path());
        let mut connection = EngineConnection::open(&config).expect("open should succeed");
        assert!(matches!(connection.engine(), StoreEngine::Lmdb(_)));

        let record = CacheRecord {
            timestamp: Utc::now(),
            feed: vec![],
        };
        connection
            .write(&[], |c| c.add(record, UpdatePolicy::Error))
            .expect("write should succeed");
        assert_eq!(connection.objects().expect("objects should succeed").len(), 1);
    }

    #[test]
    fn test_invalid_configuration_is_rejected_before_opening() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store_path = temp_dir.path().join("never-created");
        let config = StoreConfiguration::persistent(&store_path)
            .with_object_types(vec![Schema::FeedImageRecord]);

        let result = EngineConnection::open(&config);

        assert!(matches!(
            result,
            Err(FeedStoreError::Config(ConfigError::MissingSchema {
                schema: Schema::CacheRecord
            }))
        ));
        assert!(!store_path.exists());
    }

    #[test]
    fn test_unusable_location_yields_connection_error() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").expect("write file");
        let config = StoreConfiguration::persistent(file.join("store"));

        let result = EngineConnection::open(&config);

        assert!(matches!(
            result,
            Err(FeedStoreError::Storage(StorageError::Connection { .. }))
        ));
    }
}
