//! Volatile in-memory engine.
//!
//! Engines are registered process-wide by identifier: every connection opened
//! with the same identifier sees the same data, the way a named in-memory
//! database behaves. Data lives until [`InMemoryConnection::discard`] removes
//! the identifier.
//!
//! A connection can be switched into failure mode with
//! [`InMemoryConnection::fail_transactions`], which makes every write abort
//! before its block runs. Tests use this to exercise store failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use feedstore_core::StorageError;
use once_cell::sync::Lazy;

use super::{
    Connection, NotificationToken, ObjectKey, Observers, StorageEngine, StoredObject,
    UpdatePolicy, WriteSet,
};
use crate::records::CacheRecord;

static ENGINES: Lazy<Mutex<HashMap<String, Arc<SharedState>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Default, Clone)]
struct Snapshot {
    version: u64,
    next_key: u64,
    records: BTreeMap<u64, CacheRecord>,
}

impl Snapshot {
    fn objects(&self) -> Vec<StoredObject<CacheRecord>> {
        self.records
            .iter()
            .map(|(key, record)| StoredObject::new(ObjectKey(*key), record.clone()))
            .collect()
    }

    /// The snapshot after `writes`; a rejected add leaves `self` untouched.
    fn apply(&self, writes: &WriteSet) -> Result<Snapshot, StorageError> {
        let mut next = self.clone();
        for key in writes.deletes() {
            next.records.remove(&key.0);
        }
        for (record, policy) in writes.adds() {
            match policy {
                UpdatePolicy::Error if !next.records.is_empty() => {
                    return Err(StorageError::SingleSlotViolation);
                }
                UpdatePolicy::Error => {}
                UpdatePolicy::Replace => next.records.clear(),
            }
            next.records.insert(next.next_key, record.clone());
            next.next_key += 1;
        }
        next.version += 1;
        Ok(next)
    }
}

#[derive(Debug, Default)]
struct SharedState {
    snapshot: RwLock<Snapshot>,
    observers: Observers,
}

/// Handle onto a named in-memory engine.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    identifier: String,
    shared: Arc<SharedState>,
    fail_transactions: bool,
}

/// Connection onto the in-memory engine.
pub type InMemoryConnection = Connection<MemoryEngine>;

impl MemoryEngine {
    /// Attach to the engine registered under `identifier`, creating it if needed.
    pub fn open(identifier: &str) -> Result<Self, StorageError> {
        let mut engines = ENGINES.lock().map_err(|_| StorageError::LockPoisoned)?;
        let shared = engines
            .entry(identifier.to_string())
            .or_insert_with(|| {
                tracing::debug!(identifier, "created in-memory engine");
                Arc::new(SharedState::default())
            })
            .clone();
        Ok(Self {
            identifier: identifier.to_string(),
            shared,
            fail_transactions: false,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl StorageEngine for MemoryEngine {
    fn load(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError> {
        self.shared
            .snapshot
            .read()
            .map(|snapshot| snapshot.objects())
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn transact<R, F>(
        &self,
        without_notifying: &[NotificationToken],
        stage: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(Vec<StoredObject<CacheRecord>>) -> Result<(R, WriteSet), StorageError>,
    {
        let value = {
            // The write lock is the writer for this identifier until commit.
            let mut snapshot = self
                .shared
                .snapshot
                .write()
                .map_err(|_| StorageError::LockPoisoned)?;

            let (value, writes) = stage(snapshot.objects())?;
            if writes.is_empty() {
                return Ok(value);
            }

            *snapshot = snapshot.apply(&writes)?;
            tracing::trace!(
                identifier = %self.identifier,
                version = snapshot.version,
                "committed in-memory transaction"
            );
            value
        };

        self.shared.observers.notify(without_notifying);
        Ok(value)
    }

    fn version(&self) -> Result<u64, StorageError> {
        self.shared
            .snapshot
            .read()
            .map(|snapshot| snapshot.version)
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn begin(&self) -> Result<(), StorageError> {
        if self.fail_transactions {
            return Err(StorageError::TransactionFailed {
                reason: format!("write rejected by failing engine {:?}", self.identifier),
            });
        }
        Ok(())
    }

    fn observe(
        &self,
        observer: Box<dyn Fn() + Send + Sync>,
    ) -> Result<NotificationToken, StorageError> {
        self.shared.observers.observe(observer)
    }

    fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError> {
        self.shared.observers.unobserve(token)
    }
}

impl Connection<MemoryEngine> {
    /// Open a connection onto the engine registered under `identifier`.
    pub fn open(identifier: &str) -> Result<Self, StorageError> {
        Connection::new(MemoryEngine::open(identifier)?)
    }

    /// Make every write on this connection fail before its block runs.
    pub fn fail_transactions(mut self) -> Self {
        self.engine_mut().fail_transactions = true;
        self
    }

    /// Drop the engine registered under `identifier`.
    ///
    /// Connections still holding the engine keep working on the detached data;
    /// the next `open` with the same identifier starts empty.
    pub fn discard(identifier: &str) -> Result<(), StorageError> {
        ENGINES
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(identifier);
        Ok(())
    }
}
