//! LMDB-backed engine.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable engine behind
//! the cache store.
//!
//! # Layout
//!
//! One named database, `feed_cache`, maps a big-endian `u64` object key to a
//! JSON-encoded [`CacheRecord`]. The single-slot invariant is checked inside
//! the write transaction, so it holds across processes sharing the directory.
//!
//! # Environments
//!
//! LMDB allows an environment to be opened only once per process. Opened
//! environments are kept in a process-wide registry keyed by canonical path;
//! every connection is a cheap handle onto the shared environment.
//!
//! # Thread Safety
//!
//! - Read transactions for `load`
//! - One write transaction per write block, held from the block's first read
//!   until commit; LMDB serializes writers across threads and processes
//! - `version` reads the environment's last committed transaction id

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use feedstore_core::StorageError;
use heed::byteorder::BigEndian;
use heed::types::{SerdeJson, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use once_cell::sync::Lazy;

use super::{
    Connection, NotificationToken, ObjectKey, Observers, StorageEngine, StoredObject,
    UpdatePolicy, WriteSet,
};
use crate::records::CacheRecord;

const DATABASE_NAME: &str = "feed_cache";

/// File LMDB keeps the data in, inside the environment directory.
const DATA_FILE: &str = "data.mdb";

type CacheDatabase = Database<U64<BigEndian>, SerdeJson<CacheRecord>>;

static ENVIRONMENTS: Lazy<Mutex<HashMap<PathBuf, LmdbEngine>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Error type for LMDB engine operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbAdapterError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// An add found the single cache slot already taken.
    #[error("Cache slot already occupied")]
    SlotOccupied,

    /// The environment registry lock was poisoned.
    #[error("Environment registry poisoned")]
    RegistryPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbAdapterError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Decoding(inner) => LmdbAdapterError::Decoding(inner.to_string()),
            other => LmdbAdapterError::Transaction(other.to_string()),
        }
    }
}

/// Convert LmdbAdapterError to StorageError.
impl From<LmdbAdapterError> for StorageError {
    fn from(e: LmdbAdapterError) -> Self {
        let message = e.to_string();
        match e {
            LmdbAdapterError::EnvOpen(_)
            | LmdbAdapterError::DbOpen(_)
            | LmdbAdapterError::Io(_) => StorageError::Connection { reason: message },
            LmdbAdapterError::Transaction(reason) => StorageError::TransactionFailed { reason },
            LmdbAdapterError::Decoding(reason) => StorageError::Serialization { reason },
            LmdbAdapterError::SlotOccupied => StorageError::SingleSlotViolation,
            LmdbAdapterError::RegistryPoisoned => StorageError::LockPoisoned,
        }
    }
}

/// Handle onto an opened LMDB environment.
#[derive(Clone)]
pub struct LmdbEngine {
    path: PathBuf,
    env: Env,
    records: CacheDatabase,
    observers: Arc<Observers>,
}

/// Connection onto the LMDB engine.
pub type LmdbConnection = Connection<LmdbEngine>;

impl std::fmt::Debug for LmdbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbEngine").field("path", &self.path).finish()
    }
}

impl LmdbEngine {
    /// Attach to the environment at `path`, opening it on first use.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files are stored; created if missing
    /// * `map_size_mb` - Maximum size of the database in megabytes, used only
    ///   when this call opens the environment
    ///
    /// A registered environment whose data file has disappeared (the
    /// directory was removed and recreated) is evicted and opened afresh.
    /// Handles still holding the evicted environment keep using the unlinked
    /// files until they are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The map size in bytes overflows `usize`
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbAdapterError> {
        std::fs::create_dir_all(&path)?;
        let canonical = path.as_ref().canonicalize()?;

        let mut environments = ENVIRONMENTS
            .lock()
            .map_err(|_| LmdbAdapterError::RegistryPoisoned)?;
        if let Some(engine) = environments.get(&canonical) {
            if canonical.join(DATA_FILE).exists() {
                return Ok(engine.clone());
            }
            tracing::debug!(
                path = %canonical.display(),
                "evicting LMDB environment with missing data file"
            );
            environments.remove(&canonical);
        }

        let engine = Self::open_environment(canonical.clone(), map_size_mb)?;
        environments.insert(canonical, engine.clone());
        Ok(engine)
    }

    fn open_environment(path: PathBuf, map_size_mb: usize) -> Result<Self, LmdbAdapterError> {
        let map_size = map_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbAdapterError::EnvOpen(format!("map size of {map_size_mb} MB overflows"))
        })?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(&path)
        }
        .map_err(|e| LmdbAdapterError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbAdapterError::Transaction(e.to_string()))?;

        let records: CacheDatabase = env
            .create_database(&mut wtxn, Some(DATABASE_NAME))
            .map_err(|e| LmdbAdapterError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbAdapterError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.display(), map_size_mb, "opened LMDB environment");

        Ok(Self {
            path,
            env,
            records,
            observers: Arc::new(Observers::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_records(&self) -> Result<Vec<StoredObject<CacheRecord>>, LmdbAdapterError> {
        let rtxn = self.env.read_txn()?;
        self.read_records(&rtxn)
    }

    fn read_records(&self, txn: &RoTxn) -> Result<Vec<StoredObject<CacheRecord>>, LmdbAdapterError> {
        let mut objects = Vec::new();
        for entry in self.records.iter(txn)? {
            let (key, record) = entry?;
            objects.push(StoredObject::new(ObjectKey(key), record));
        }
        Ok(objects)
    }

    fn apply(&self, wtxn: &mut RwTxn, writes: &WriteSet) -> Result<(), LmdbAdapterError> {
        for key in writes.deletes() {
            self.records.delete(wtxn, &key.0)?;
        }

        for (record, policy) in writes.adds() {
            match policy {
                UpdatePolicy::Error if !self.records.is_empty(wtxn)? => {
                    return Err(LmdbAdapterError::SlotOccupied);
                }
                UpdatePolicy::Error => {}
                UpdatePolicy::Replace => self.records.clear(wtxn)?,
            }
            let next_key = self
                .records
                .last(wtxn)?
                .map(|(key, _)| key + 1)
                .unwrap_or(0);
            self.records.put(wtxn, &next_key, record)?;
        }
        Ok(())
    }
}

impl StorageEngine for LmdbEngine {
    fn load(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError> {
        Ok(self.load_records()?)
    }

    fn transact<R, F>(
        &self,
        without_notifying: &[NotificationToken],
        stage: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(Vec<StoredObject<CacheRecord>>) -> Result<(R, WriteSet), StorageError>,
    {
        // Returning early drops the write transaction, which aborts it.
        let mut wtxn = self.env.write_txn().map_err(LmdbAdapterError::from)?;
        let view = self.read_records(&wtxn)?;

        let (value, writes) = stage(view)?;
        if writes.is_empty() {
            return Ok(value);
        }

        self.apply(&mut wtxn, &writes)?;
        wtxn.commit().map_err(LmdbAdapterError::from)?;
        tracing::trace!(
            path = %self.path.display(),
            deleted = writes.deletes().len(),
            added = writes.adds().len(),
            "committed LMDB transaction"
        );

        self.observers.notify(without_notifying);
        Ok(value)
    }

    fn version(&self) -> Result<u64, StorageError> {
        Ok(self.env.info().last_txn_id as u64)
    }

    fn observe(
        &self,
        observer: Box<dyn Fn() + Send + Sync>,
    ) -> Result<NotificationToken, StorageError> {
        self.observers.observe(observer)
    }

    fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError> {
        self.observers.unobserve(token)
    }
}

impl Connection<LmdbEngine> {
    /// Open a connection onto the LMDB environment at `path`.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, StorageError> {
        Connection::new(LmdbEngine::open(path, map_size_mb)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PersistenceConnection;
    use crate::records::FeedImageRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_connection() -> (LmdbConnection, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let connection =
            LmdbConnection::open(temp_dir.path(), 10).expect("connection should open");
        (connection, temp_dir)
    }

    fn make_record(url: &str) -> CacheRecord {
        CacheRecord {
            timestamp: Utc::now(),
            feed: vec![FeedImageRecord {
                id: uuid::Uuid::new_v4().to_string(),
                description: Some("description".to_string()),
                location: None,
                url: url.to_string(),
            }],
        }
    }

    #[test]
    fn test_new_connection_is_empty() {
        let (connection, _temp_dir) = create_test_connection();
        assert!(connection
            .objects()
            .expect("objects should succeed")
            .is_empty());
    }

    #[test]
    fn test_add_and_load() {
        let (mut connection, _temp_dir) = create_test_connection();
        let record = make_record("http://example.com/a.png");

        connection
            .write(&[], |c| c.add(record.clone(), UpdatePolicy::Error))
            .expect("write should succeed");

        let objects = connection.objects().expect("objects should succeed");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].value(), &record);
    }

    #[test]
    fn test_delete_then_add_in_one_transaction() {
        let (mut connection, _temp_dir) = create_test_connection();
        let original = make_record("http://example.com/old.png");
        connection
            .write(&[], |c| c.add(original, UpdatePolicy::Error))
            .expect("write should succeed");
        let replacement = make_record("http://example.com/new.png");

        connection
            .write(&[], |c| {
                let existing = c.objects()?;
                c.delete(&existing)?;
                c.add(replacement.clone(), UpdatePolicy::Error)
            })
            .expect("write should succeed");

        let objects = connection.objects().expect("objects should succeed");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].value(), &replacement);
    }

    #[test]
    fn test_occupied_slot_aborts_transaction() {
        let (mut connection, _temp_dir) = create_test_connection();
        let original = make_record("http://example.com/a.png");
        connection
            .write(&[], |c| c.add(original.clone(), UpdatePolicy::Error))
            .expect("write should succeed");

        let competing = make_record("http://example.com/b.png");
        let result = connection.write(&[], |c| c.add(competing, UpdatePolicy::Error));

        assert_eq!(result, Err(StorageError::SingleSlotViolation));
        let objects = connection.objects().expect("objects should succeed");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].value(), &original);
    }

    #[test]
    fn test_reopen_shares_environment() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let mut first = LmdbConnection::open(temp_dir.path(), 10).expect("open should succeed");
        let mut second = LmdbConnection::open(temp_dir.path(), 10).expect("reopen should succeed");

        let record = make_record("http://example.com/a.png");
        first
            .write(&[], |c| c.add(record, UpdatePolicy::Error))
            .expect("write should succeed");

        assert!(second.refresh(), "second handle should see the commit");
        assert_eq!(second.objects().expect("objects should succeed").len(), 1);
    }

    #[test]
    fn test_concurrent_replacing_writers_never_collide() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let writers = 6;
        let start = Arc::new(std::sync::Barrier::new(writers));

        let handles: Vec<_> = (0..writers)
            .map(|writer| {
                let path = temp_dir.path().to_path_buf();
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    let mut connection =
                        LmdbConnection::open(&path, 10).expect("connection should open");
                    start.wait();
                    (0..50)
                        .map(|round| {
                            let record =
                                make_record(&format!("http://example.com/{writer}/{round}.png"));
                            connection.write(&[], |c| {
                                let existing = c.objects()?;
                                c.delete(&existing)?;
                                c.add(record, UpdatePolicy::Error)
                            })
                        })
                        .filter(Result::is_err)
                        .count()
                })
            })
            .collect();

        let failures: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("writer should not panic"))
            .sum();
        assert_eq!(failures, 0);
        let connection = LmdbConnection::open(temp_dir.path(), 10).expect("open should succeed");
        assert_eq!(connection.objects().expect("objects should succeed").len(), 1);
    }

    #[test]
    fn test_oversized_map_is_rejected() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");

        let result = LmdbConnection::open(temp_dir.path().join("huge"), usize::MAX / 2);

        assert!(matches!(result, Err(StorageError::Connection { .. })));
    }

    #[test]
    fn test_recreated_directory_opens_fresh_environment() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let path = temp_dir.path().join("store");
        {
            let mut connection = LmdbConnection::open(&path, 10).expect("open should succeed");
            connection
                .write(&[], |c| {
                    c.add(make_record("http://example.com/a.png"), UpdatePolicy::Error)
                })
                .expect("write should succeed");
        }

        std::fs::remove_dir_all(&path).expect("remove store directory");
        let mut reopened = LmdbConnection::open(&path, 10).expect("reopen should succeed");

        assert!(reopened.objects().expect("objects should succeed").is_empty());
        reopened
            .write(&[], |c| {
                c.add(make_record("http://example.com/b.png"), UpdatePolicy::Error)
            })
            .expect("write should succeed");
        assert!(path.join(DATA_FILE).exists());
    }

    #[test]
    fn test_open_under_file_fails_with_connection_error() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let file = temp_dir.path().join("not-a-directory");
        std::fs::write(&file, b"x").expect("write file");

        let result = LmdbConnection::open(file.join("store"), 10);

        assert!(matches!(result, Err(StorageError::Connection { .. })));
    }
}
