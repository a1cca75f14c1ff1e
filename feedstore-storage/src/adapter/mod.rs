//! Persistence adapter: the capability boundary to the storage engine.
//!
//! The cache store talks to storage only through [`PersistenceConnection`],
//! which has exactly five operations: enumerate, transact, add, delete and
//! refresh. Engines plug in underneath through [`StorageEngine`]; the generic
//! [`Connection`] turns any engine into a connection by running a write block
//! inside the engine's write transaction and committing what it staged as one
//! unit.
//!
//! # Engines
//!
//! - [`LmdbEngine`]: durable, backed by LMDB through heed
//! - [`MemoryEngine`]: volatile, shared by identifier, with failure injection
//! - [`StoreEngine`]: either of the above, chosen from a [`StoreConfiguration`]
//!
//! [`StoreConfiguration`]: feedstore_core::StoreConfiguration

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use feedstore_core::StorageError;

use crate::records::CacheRecord;

pub mod engine;
pub mod lmdb;
pub mod memory;

pub use engine::{EngineConnection, StoreEngine};
pub use lmdb::{LmdbAdapterError, LmdbConnection, LmdbEngine};
pub use memory::{InMemoryConnection, MemoryEngine};

// ============================================================================
// OBJECT HANDLES
// ============================================================================

/// Engine-assigned key of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(pub u64);

/// An object read from the engine together with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject<T> {
    key: ObjectKey,
    value: T,
}

impl<T> StoredObject<T> {
    pub fn new(key: ObjectKey, value: T) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Conflict policy for [`PersistenceConnection::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Fail the transaction if a cache record would already exist at commit.
    Error,
    /// Remove any existing cache record before adding.
    Replace,
}

// ============================================================================
// CHANGE NOTIFICATIONS
// ============================================================================

/// Handle of a registered change observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationToken(u64);

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Observers notified after every commit that changed stored data.
#[derive(Default)]
pub struct Observers {
    next_token: AtomicU64,
    observers: RwLock<Vec<(NotificationToken, Observer)>>,
}

impl Observers {
    pub fn observe<F>(&self, observer: F) -> Result<NotificationToken, StorageError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let token = NotificationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .push((token, Arc::new(observer)));
        Ok(token)
    }

    pub fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError> {
        self.observers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|(registered, _)| *registered != token);
        Ok(())
    }

    /// Notify every observer except the suppressed ones.
    ///
    /// Callbacks run outside the lock so an observer may register or remove
    /// observers itself.
    pub fn notify(&self, without_notifying: &[NotificationToken]) {
        let targets: Vec<Observer> = match self.observers.read() {
            Ok(observers) => observers
                .iter()
                .filter(|(token, _)| !without_notifying.contains(token))
                .map(|(_, observer)| Arc::clone(observer))
                .collect(),
            Err(_) => return,
        };
        for observer in targets {
            observer();
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.observers.read().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("Observers").field("count", &count).finish()
    }
}

// ============================================================================
// WRITE SET
// ============================================================================

/// Mutations staged by a write block, committed together.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    deletes: Vec<ObjectKey>,
    adds: Vec<(CacheRecord, UpdatePolicy)>,
}

impl WriteSet {
    pub fn deletes(&self) -> &[ObjectKey] {
        &self.deletes
    }

    pub fn adds(&self) -> &[(CacheRecord, UpdatePolicy)] {
        &self.adds
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.adds.is_empty()
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Capability interface the cache store consumes.
pub trait PersistenceConnection: Send {
    /// Enumerate the stored cache records in key order.
    ///
    /// Inside [`write`](Self::write) this reads through the open write
    /// transaction.
    fn objects(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError>;

    /// Run `block` as one atomic transaction.
    ///
    /// Mutations made by the block are committed together when it returns
    /// `Ok`, and discarded when it returns `Err` or the commit fails. Observers
    /// whose tokens are listed in `without_notifying` are not told about the
    /// commit.
    fn write<R, F>(
        &mut self,
        without_notifying: &[NotificationToken],
        block: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Self) -> Result<R, StorageError>;

    /// Add a cache record. Only valid inside [`write`](Self::write).
    fn add(&mut self, record: CacheRecord, policy: UpdatePolicy) -> Result<(), StorageError>;

    /// Delete the given objects. Only valid inside [`write`](Self::write).
    fn delete(&mut self, objects: &[StoredObject<CacheRecord>]) -> Result<(), StorageError>;

    /// Advance this connection's view to the latest commit.
    ///
    /// Returns whether anything was committed since the connection last looked.
    fn refresh(&mut self) -> bool;
}

/// Engine-side seam beneath [`Connection`].
pub trait StorageEngine: Clone + Send {
    /// Read the committed cache records.
    fn load(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError>;

    /// Open a write transaction, hand `stage` the records it sees, then apply
    /// and commit the write set `stage` returns and notify observers.
    ///
    /// The engine's writer is held from the read until the commit, so no
    /// other writer commits in between. An error from `stage` or from
    /// applying the writes aborts the transaction.
    fn transact<R, F>(
        &self,
        without_notifying: &[NotificationToken],
        stage: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(Vec<StoredObject<CacheRecord>>) -> Result<(R, WriteSet), StorageError>;

    /// Monotonic marker of the latest commit.
    fn version(&self) -> Result<u64, StorageError>;

    /// Called before a write transaction opens; an error aborts it.
    fn begin(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Register a change observer.
    fn observe(
        &self,
        observer: Box<dyn Fn() + Send + Sync>,
    ) -> Result<NotificationToken, StorageError>;

    /// Remove a change observer.
    fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError>;
}

// ============================================================================
// GENERIC CONNECTION
// ============================================================================

/// A connection handle onto a storage engine.
///
/// Cheap to open; the cache store opens a fresh one for every operation and
/// never shares it across threads.
#[derive(Debug)]
pub struct Connection<E> {
    engine: E,
    seen_version: u64,
    pending: Option<PendingWrite>,
}

/// The write block currently running on a connection.
#[derive(Debug)]
struct PendingWrite {
    /// Records as seen by the engine's write transaction.
    view: Vec<StoredObject<CacheRecord>>,
    writes: WriteSet,
}

impl<E: StorageEngine> Connection<E> {
    pub fn new(engine: E) -> Result<Self, StorageError> {
        let seen_version = engine.version()?;
        Ok(Self {
            engine,
            seen_version,
            pending: None,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Register an observer called after every commit that changes data.
    pub fn observe<F>(&self, observer: F) -> Result<NotificationToken, StorageError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.engine.observe(Box::new(observer))
    }

    pub fn unobserve(&self, token: NotificationToken) -> Result<(), StorageError> {
        self.engine.unobserve(token)
    }

    fn staged(&mut self) -> Result<&mut WriteSet, StorageError> {
        self.pending
            .as_mut()
            .map(|pending| &mut pending.writes)
            .ok_or(StorageError::NotInTransaction)
    }
}

impl<E: StorageEngine> PersistenceConnection for Connection<E> {
    fn objects(&self) -> Result<Vec<StoredObject<CacheRecord>>, StorageError> {
        match &self.pending {
            Some(pending) => Ok(pending.view.clone()),
            None => self.engine.load(),
        }
    }

    fn write<R, F>(
        &mut self,
        without_notifying: &[NotificationToken],
        block: F,
    ) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Self) -> Result<R, StorageError>,
    {
        if self.pending.is_some() {
            return Err(StorageError::TransactionFailed {
                reason: "write transactions cannot be nested".to_string(),
            });
        }
        self.engine.begin()?;

        let engine = self.engine.clone();
        let value = engine
            .transact(without_notifying, |view| {
                self.pending = Some(PendingWrite {
                    view,
                    writes: WriteSet::default(),
                });
                let outcome = block(self);
                let writes = self
                    .pending
                    .take()
                    .map(|pending| pending.writes)
                    .unwrap_or_default();
                let value = outcome.inspect_err(|e| {
                    tracing::trace!(error = %e, "write block failed, staged mutations discarded");
                })?;
                Ok((value, writes))
            })
            .inspect_err(|e| {
                tracing::trace!(error = %e, "write transaction aborted");
            })?;

        // Our own commit is already part of this connection's view. It stands
        // even when the marker cannot be read back.
        if let Ok(version) = self.engine.version() {
            self.seen_version = version;
        }
        Ok(value)
    }

    fn add(&mut self, record: CacheRecord, policy: UpdatePolicy) -> Result<(), StorageError> {
        self.staged()?.adds.push((record, policy));
        Ok(())
    }

    fn delete(&mut self, objects: &[StoredObject<CacheRecord>]) -> Result<(), StorageError> {
        let staged = self.staged()?;
        staged.deletes.extend(objects.iter().map(StoredObject::key));
        Ok(())
    }

    fn refresh(&mut self) -> bool {
        // While this connection holds the writer nothing else can commit.
        if self.pending.is_some() {
            return false;
        }
        match self.engine.version() {
            Ok(version) => {
                let changed = version != self.seen_version;
                self.seen_version = version;
                changed
            }
            Err(_) => false,
        }
    }
}
