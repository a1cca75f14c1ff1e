//! The cache store: a single-slot [`FeedStore`] over a persistence adapter.
//!
//! Every operation opens a fresh connection from the store's factory on the
//! scheduler thread that runs it, so no connection crosses threads. Inserts
//! and deletes are scheduled as barriers; retrieves are scheduled as reads.
//! Each completion is invoked exactly once, with an error if the work panics.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use feedstore_core::{
    CachedFeed, DeletionCompletion, FeedImage, FeedStore, FeedStoreResult, InsertionCompletion,
    RetrievalCompletion, StorageError, StoreConfiguration, Timestamp,
};

use crate::adapter::{EngineConnection, PersistenceConnection, UpdatePolicy};
use crate::mapper;
use crate::scheduler::OperationScheduler;

/// Opens a connection for one operation.
pub type ConnectionFactory<C> = Arc<dyn Fn() -> FeedStoreResult<C> + Send + Sync>;

/// Read workers used when none are configured.
pub const DEFAULT_READ_WORKERS: usize = feedstore_core::config::DEFAULT_WORKER_THREADS;

/// Single-slot feed cache.
///
/// Holds at most one cached feed. Mutations run one at a time in submission
/// order; retrievals may overlap each other but never a mutation.
pub struct CacheStore<C> {
    factory: ConnectionFactory<C>,
    scheduler: OperationScheduler,
}

impl<C: PersistenceConnection + 'static> CacheStore<C> {
    /// Create a store with the default number of read workers.
    pub fn new<F>(factory: F) -> FeedStoreResult<Self>
    where
        F: Fn() -> FeedStoreResult<C> + Send + Sync + 'static,
    {
        Self::with_workers(factory, DEFAULT_READ_WORKERS)
    }

    /// Create a store whose retrievals share `read_workers` threads.
    pub fn with_workers<F>(factory: F, read_workers: usize) -> FeedStoreResult<Self>
    where
        F: Fn() -> FeedStoreResult<C> + Send + Sync + 'static,
    {
        Ok(Self {
            factory: Arc::new(factory),
            scheduler: OperationScheduler::new(read_workers)?,
        })
    }

    /// Stop accepting operations and wait for the queued ones to finish.
    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}

impl CacheStore<EngineConnection> {
    /// Create a store over the engine described by `config`.
    ///
    /// The configuration is not checked here: an invalid configuration or an
    /// unusable location makes every operation complete with the error.
    pub fn open(config: StoreConfiguration) -> FeedStoreResult<Self> {
        let read_workers = config.worker_threads.max(1);
        Self::with_workers(move || EngineConnection::open(&config), read_workers)
    }
}

impl<C> std::fmt::Debug for CacheStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<C: PersistenceConnection + 'static> FeedStore for CacheStore<C> {
    fn delete_cached_feed(&self, completion: DeletionCompletion) {
        let factory = Arc::clone(&self.factory);
        self.scheduler
            .submit_barrier(move || completion(contained(|| empty_cache(factory.as_ref()))));
    }

    fn insert(&self, feed: Vec<FeedImage>, timestamp: Timestamp, completion: InsertionCompletion) {
        let factory = Arc::clone(&self.factory);
        self.scheduler.submit_barrier(move || {
            completion(contained(|| replace_cache(factory.as_ref(), &feed, timestamp)))
        });
    }

    fn retrieve(&self, completion: RetrievalCompletion) {
        let factory = Arc::clone(&self.factory);
        self.scheduler
            .submit_read(move || completion(contained(|| read_cache(factory.as_ref()))));
    }
}

fn contained<T>(work: impl FnOnce() -> FeedStoreResult<T>) -> FeedStoreResult<T> {
    catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
        tracing::warn!("cache operation panicked");
        Err(StorageError::TransactionFailed {
            reason: "operation panicked".to_string(),
        }
        .into())
    })
}

fn empty_cache<C, F>(factory: &F) -> FeedStoreResult<()>
where
    C: PersistenceConnection,
    F: Fn() -> FeedStoreResult<C> + ?Sized,
{
    let mut connection = factory()?;
    connection.write(&[], |c| {
        let existing = c.objects()?;
        c.delete(&existing)
    })?;
    Ok(())
}

fn replace_cache<C, F>(factory: &F, feed: &[FeedImage], timestamp: Timestamp) -> FeedStoreResult<()>
where
    C: PersistenceConnection,
    F: Fn() -> FeedStoreResult<C> + ?Sized,
{
    let record = mapper::to_cache_record(feed, timestamp);
    let mut connection = factory()?;
    // Delete and add commit together: readers see the old cache or the new one.
    connection.write(&[], |c| {
        let existing = c.objects()?;
        c.delete(&existing)?;
        c.add(record, UpdatePolicy::Error)
    })?;
    Ok(())
}

fn read_cache<C, F>(factory: &F) -> FeedStoreResult<Option<CachedFeed>>
where
    C: PersistenceConnection,
    F: Fn() -> FeedStoreResult<C> + ?Sized,
{
    let mut connection = factory()?;
    // Best effort: the read below is correct whether or not anything changed.
    let _ = connection.refresh();
    let objects = connection.objects()?;
    match objects.first() {
        Some(object) => Ok(Some(mapper::to_cached_feed(object.value())?)),
        None => Ok(None),
    }
}

// =============================================================================
// TESTS
// =============================================================================
