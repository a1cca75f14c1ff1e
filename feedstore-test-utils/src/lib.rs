//! Feedstore Test Utilities
//!
//! Centralized test infrastructure for the feedstore workspace:
//! - Proptest generators for the domain types
//! - Fixtures for feeds, stores and broken store states
//! - Custom assertions for retrieve outcomes and error variants
//! - The [`FeedStore`] contract as reusable async checks

// Re-export core types for convenience
pub use feedstore_core::{
    CachedFeed, ConfigError, ConversionError, FeedImage, FeedStore, FeedStoreError,
    FeedStoreResult, RetrieveCachedFeedResult, StorageError, StoreConfiguration, Timestamp,
};
pub use feedstore_storage::{CacheStore, FeedStoreExt, InMemoryConnection};

use chrono::Utc;
use url::Url;
use uuid::Uuid;

/// Install a fmt subscriber honouring `RUST_LOG`, once per process.
///
/// Later calls are no-ops, so every test may call it.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating feedstore domain values.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp with sub-second precision.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-01-01 .. 2030-01-01
        (1577836800i64..1893456000i64, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
        })
    }

    /// Generate an absolute http(s) URL.
    pub fn arb_url() -> impl Strategy<Value = Url> {
        (
            prop_oneof![Just("http"), Just("https")],
            "[a-z]{1,12}",
            "[a-z0-9]{0,16}",
        )
            .prop_map(|(scheme, host, path)| {
                Url::parse(&format!("{scheme}://{host}.example.com/{path}"))
                    .unwrap_or_else(|_| fixtures::any_url())
            })
    }

    /// Generate a feed image with optional description and location.
    pub fn arb_feed_image() -> impl Strategy<Value = FeedImage> {
        (
            arb_uuid(),
            proptest::option::of(".{0,32}"),
            proptest::option::of(".{0,32}"),
            arb_url(),
        )
            .prop_map(|(id, description, location, url)| {
                FeedImage::new(id, description, location, url)
            })
    }

    /// Generate a feed of up to `max_len` images.
    pub fn arb_feed(max_len: usize) -> impl Strategy<Value = Vec<FeedImage>> {
        proptest::collection::vec(arb_feed_image(), 0..=max_len)
    }

    /// Generate a cached feed of up to 8 images.
    pub fn arb_cached_feed() -> impl Strategy<Value = CachedFeed> {
        (arb_feed(8), arb_timestamp()).prop_map(|(feed, timestamp)| CachedFeed::new(feed, timestamp))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values and stores for common testing scenarios.

    use super::*;
    use feedstore_storage::adapter::{PersistenceConnection, UpdatePolicy};
    use feedstore_storage::{CacheRecord, FeedImageRecord};
    use std::path::{Path, PathBuf};

    /// A fixed, valid URL.
    pub fn any_url() -> Url {
        Url::parse("http://any-url.com").expect("fixture URL should parse")
    }

    /// A feed image with a fresh identifier.
    pub fn unique_image() -> FeedImage {
        FeedImage::new(
            Uuid::new_v4(),
            Some("any".to_string()),
            Some("any".to_string()),
            any_url(),
        )
    }

    /// A two-image feed with fresh identifiers.
    pub fn unique_image_feed() -> Vec<FeedImage> {
        vec![unique_image(), unique_image()]
    }

    /// The current instant.
    pub fn any_timestamp() -> Timestamp {
        Utc::now()
    }

    /// An identifier no other test uses.
    pub fn unique_identifier(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4())
    }

    /// A store over the in-memory engine named `identifier`.
    pub fn in_memory_store(identifier: &str) -> CacheStore<InMemoryConnection> {
        let identifier = identifier.to_string();
        CacheStore::new(move || Ok(InMemoryConnection::open(&identifier)?))
            .expect("in-memory store should start")
    }

    /// A store over the in-memory engine named `identifier` whose writes fail.
    pub fn failing_store(identifier: &str) -> CacheStore<InMemoryConnection> {
        let identifier = identifier.to_string();
        CacheStore::new(move || Ok(InMemoryConnection::open(&identifier)?.fail_transactions()))
            .expect("failing store should start")
    }

    /// A store over the LMDB engine rooted at `path`.
    pub fn persistent_store(path: &Path) -> CacheStore<feedstore_storage::EngineConnection> {
        CacheStore::open(StoreConfiguration::persistent(path))
            .expect("persistent store should start")
    }

    /// A store location inside `dir` that can never be opened.
    ///
    /// The location sits beneath a regular file, so creating it fails.
    pub fn unusable_location(dir: &Path) -> PathBuf {
        let file = dir.join("not-a-directory");
        std::fs::write(&file, b"occupied").expect("blocking file should be written");
        file.join("store")
    }

    /// Persist a cache record whose single image has an invalid identifier.
    pub fn insert_corrupted_cache(identifier: &str) {
        let record = CacheRecord {
            timestamp: any_timestamp(),
            feed: vec![FeedImageRecord {
                id: "not-a-uuid".to_string(),
                description: None,
                location: None,
                url: any_url().to_string(),
            }],
        };
        let mut connection =
            InMemoryConnection::open(identifier).expect("in-memory engine should open");
        connection
            .write(&[], |c| c.add(record, UpdatePolicy::Error))
            .expect("corrupted record should be written");
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for feedstore outcomes.

    use super::*;

    /// Unwrap a completion outcome, failing if the completion never fired.
    #[track_caller]
    pub fn completed<T>(outcome: Option<T>) -> T {
        match outcome {
            Some(value) => value,
            None => panic!("Expected the completion to fire, but it was abandoned"),
        }
    }

    /// Assert that a retrieve delivered an empty cache.
    #[track_caller]
    pub fn assert_empty(result: &RetrieveCachedFeedResult) {
        assert!(
            matches!(result, Ok(None)),
            "Expected empty cache, got: {:?}",
            result
        );
    }

    /// Assert that a retrieve delivered exactly `feed` saved at `timestamp`.
    #[track_caller]
    pub fn assert_found(result: &RetrieveCachedFeedResult, feed: &[FeedImage], timestamp: Timestamp) {
        match result {
            Ok(Some(cached)) => {
                assert_eq!(cached.feed, feed, "Retrieved feed differs");
                assert_eq!(cached.timestamp, timestamp, "Retrieved timestamp differs");
            }
            other => panic!("Expected found cache, got: {:?}", other),
        }
    }

    /// Assert that an operation succeeded.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &FeedStoreResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an operation failed.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &FeedStoreResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that an operation failed with a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &FeedStoreResult<T>) {
        match result {
            Err(FeedStoreError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that an operation failed because the engine could not be reached.
    #[track_caller]
    pub fn assert_connection_error<T: std::fmt::Debug>(result: &FeedStoreResult<T>) {
        match result {
            Err(FeedStoreError::Storage(StorageError::Connection { .. })) => {}
            other => panic!("Expected Connection error, got: {:?}", other),
        }
    }

    /// Assert that an operation failed while mapping stored data.
    #[track_caller]
    pub fn assert_conversion_error<T: std::fmt::Debug>(result: &FeedStoreResult<T>) {
        match result {
            Err(FeedStoreError::Conversion(_)) => {}
            other => panic!("Expected Conversion error, got: {:?}", other),
        }
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

pub mod contract {
    //! The [`FeedStore`] contract as reusable async checks.
    //!
    //! Each function drives a fresh store through one scenario and panics on
    //! any deviation. Suites call them once per store implementation.

    use super::assertions::*;
    use super::fixtures::*;
    use super::*;
    use tokio::sync::mpsc;

    async fn insert<S: FeedStore + ?Sized>(
        store: &S,
        feed: Vec<FeedImage>,
        timestamp: Timestamp,
    ) -> FeedStoreResult<()> {
        completed(store.insert_cached(feed, timestamp).await)
    }

    async fn delete<S: FeedStore + ?Sized>(store: &S) -> FeedStoreResult<()> {
        completed(store.delete_cached().await)
    }

    async fn retrieve<S: FeedStore + ?Sized>(store: &S) -> RetrieveCachedFeedResult {
        completed(store.retrieve_cached().await)
    }

    // === Retrieve ===

    pub async fn assert_that_retrieve_delivers_empty_on_empty_cache<S: FeedStore + ?Sized>(
        store: &S,
    ) {
        assert_empty(&retrieve(store).await);
    }

    pub async fn assert_that_retrieve_has_no_side_effects_on_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_empty(&retrieve(store).await);
        assert_empty(&retrieve(store).await);
    }

    pub async fn assert_that_retrieve_delivers_found_values_on_non_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        let feed = unique_image_feed();
        let timestamp = any_timestamp();

        assert_ok(&insert(store, feed.clone(), timestamp).await);

        assert_found(&retrieve(store).await, &feed, timestamp);
    }

    pub async fn assert_that_retrieve_has_no_side_effects_on_non_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        let feed = unique_image_feed();
        let timestamp = any_timestamp();

        assert_ok(&insert(store, feed.clone(), timestamp).await);

        assert_found(&retrieve(store).await, &feed, timestamp);
        assert_found(&retrieve(store).await, &feed, timestamp);
    }

    // === Insert ===

    pub async fn assert_that_insert_delivers_no_error_on_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);
    }

    pub async fn assert_that_insert_delivers_no_error_on_non_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);

        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);
    }

    pub async fn assert_that_insert_overrides_previously_inserted_cache_values<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);

        let latest_feed = unique_image_feed();
        let latest_timestamp = any_timestamp();
        assert_ok(&insert(store, latest_feed.clone(), latest_timestamp).await);

        assert_found(&retrieve(store).await, &latest_feed, latest_timestamp);
    }

    // === Delete ===

    pub async fn assert_that_delete_delivers_no_error_on_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&delete(store).await);
    }

    pub async fn assert_that_delete_has_no_side_effects_on_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&delete(store).await);

        assert_empty(&retrieve(store).await);
    }

    pub async fn assert_that_delete_delivers_no_error_on_non_empty_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);

        assert_ok(&delete(store).await);
    }

    pub async fn assert_that_delete_empties_previously_inserted_cache<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_ok(&insert(store, unique_image_feed(), any_timestamp()).await);

        assert_ok(&delete(store).await);

        assert_empty(&retrieve(store).await);
    }

    // === Ordering ===

    pub async fn assert_that_side_effects_run_serially<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        let (sender, mut rx) = mpsc::unbounded_channel();

        let op1 = sender.clone();
        store.insert(
            unique_image_feed(),
            any_timestamp(),
            Box::new(move |_| {
                let _ = op1.send(1);
            }),
        );
        let op2 = sender.clone();
        store.delete_cached_feed(Box::new(move |_| {
            let _ = op2.send(2);
        }));
        let op3 = sender.clone();
        store.insert(
            unique_image_feed(),
            any_timestamp(),
            Box::new(move |_| {
                let _ = op3.send(3);
            }),
        );
        drop(sender);

        let mut completed_operations = Vec::new();
        while let Some(operation) = rx.recv().await {
            completed_operations.push(operation);
        }
        assert_eq!(
            completed_operations,
            vec![1, 2, 3],
            "Expected side-effects to run serially but operations finished in the wrong order"
        );
    }

    // === Failable retrieve ===

    /// `store` must be unable to read its cache.
    pub async fn assert_that_retrieve_delivers_failure_on_retrieval_error<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_err(&retrieve(store).await);
    }

    /// `store` must be unable to read its cache.
    pub async fn assert_that_retrieve_has_no_side_effects_on_failure<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_err(&retrieve(store).await);
        assert_err(&retrieve(store).await);
    }

    // === Failable insert ===

    /// `store` must reject writes.
    pub async fn assert_that_insert_delivers_error_on_insertion_error<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_err(&insert(store, unique_image_feed(), any_timestamp()).await);
    }

    /// `store` must reject writes and start empty.
    pub async fn assert_that_insert_has_no_side_effects_on_insertion_error<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        let _ = insert(store, unique_image_feed(), any_timestamp()).await;

        assert_empty(&retrieve(store).await);
    }

    // === Failable delete ===

    /// `store` must reject writes.
    pub async fn assert_that_delete_delivers_error_on_deletion_error<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        assert_err(&delete(store).await);
    }

    /// `store` must reject writes and start empty.
    pub async fn assert_that_delete_has_no_side_effects_on_deletion_error<S>(store: &S)
    where
        S: FeedStore + ?Sized,
    {
        let _ = delete(store).await;

        assert_empty(&retrieve(store).await);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unique_image_feed_has_distinct_ids() {
        let feed = fixtures::unique_image_feed();
        assert_eq!(feed.len(), 2);
        assert_ne!(feed[0].id, feed[1].id);
    }

    #[test]
    fn test_unique_identifier_is_prefixed_and_unique() {
        let a = fixtures::unique_identifier("suite");
        let b = fixtures::unique_identifier("suite");
        assert!(a.starts_with("suite-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_assertion_found_accepts_matching_cache() {
        let feed = fixtures::unique_image_feed();
        let timestamp = fixtures::any_timestamp();
        let result: RetrieveCachedFeedResult = Ok(Some(CachedFeed::new(feed.clone(), timestamp)));
        assertions::assert_found(&result, &feed, timestamp);
    }

    #[test]
    #[should_panic(expected = "Expected empty cache")]
    fn test_assertion_empty_rejects_found_cache() {
        let result: RetrieveCachedFeedResult = Ok(Some(CachedFeed::new(
            fixtures::unique_image_feed(),
            fixtures::any_timestamp(),
        )));
        assertions::assert_empty(&result);
    }

    #[test]
    fn test_assertion_connection_error() {
        let result: FeedStoreResult<()> = Err(StorageError::Connection {
            reason: "unreachable".to_string(),
        }
        .into());
        assertions::assert_storage_error(&result);
        assertions::assert_connection_error(&result);
    }

    #[test]
    #[should_panic(expected = "abandoned")]
    fn test_completed_panics_on_abandoned_completion() {
        assertions::completed::<()>(None);
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_urls_are_http(url in generators::arb_url()) {
            prop_assert!(url.scheme() == "http" || url.scheme() == "https");
        }

        #[test]
        fn prop_generated_timestamps_in_range(timestamp in generators::arb_timestamp()) {
            prop_assert!(timestamp.timestamp() >= 1577836800);
            prop_assert!(timestamp.timestamp() < 1893456000);
        }
    }
}
