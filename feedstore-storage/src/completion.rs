//! Async access to the completion-based [`FeedStore`] contract.
//!
//! Each method submits the operation and awaits its completion through a
//! oneshot channel. `None` means the completion was dropped without firing.

use async_trait::async_trait;
use feedstore_core::{FeedImage, FeedStore, FeedStoreResult, RetrieveCachedFeedResult, Timestamp};
use tokio::sync::oneshot;

#[async_trait]
pub trait FeedStoreExt: FeedStore {
    async fn retrieve_cached(&self) -> Option<RetrieveCachedFeedResult>;

    async fn insert_cached(
        &self,
        feed: Vec<FeedImage>,
        timestamp: Timestamp,
    ) -> Option<FeedStoreResult<()>>;

    async fn delete_cached(&self) -> Option<FeedStoreResult<()>>;
}

#[async_trait]
impl<S: FeedStore + ?Sized> FeedStoreExt for S {
    async fn retrieve_cached(&self) -> Option<RetrieveCachedFeedResult> {
        let (tx, rx) = oneshot::channel();
        self.retrieve(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.await.ok()
    }

    async fn insert_cached(
        &self,
        feed: Vec<FeedImage>,
        timestamp: Timestamp,
    ) -> Option<FeedStoreResult<()>> {
        let (tx, rx) = oneshot::channel();
        self.insert(
            feed,
            timestamp,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.ok()
    }

    async fn delete_cached(&self) -> Option<FeedStoreResult<()>> {
        let (tx, rx) = oneshot::channel();
        self.delete_cached_feed(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.await.ok()
    }
}
