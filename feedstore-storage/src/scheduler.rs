//! Operation scheduler: concurrent reads, barrier mutations.
//!
//! Operations are submitted to a FIFO channel drained by a single dispatcher
//! task. Before dispatching an operation the dispatcher takes a permit on a
//! shared gate: a read permit for reads, the write permit for barriers. The
//! gate is a fair [`RwLock`], and permits are taken one at a time in queue
//! order, so a barrier waits for every read dispatched before it and nothing
//! queued after it starts until it has finished. Operations themselves run on
//! the runtime's blocking pool and release their permit when they return.
//!
//! ```text
//! submit ──> [ R1 R2 B1 R3 B2 ] ──> dispatcher ──> R1,R2 (read permits)
//!                                       │          B1 (write permit, alone)
//!                                       │          R3 (read permit)
//!                                       └────────> B2 (write permit, alone)
//! ```
//!
//! Consequences:
//! - barriers take effect in submission order
//! - no read overlaps a barrier
//! - submission never blocks the caller
//!
//! Dropping the scheduler closes submission; operations already queued still
//! run. [`OperationScheduler::shutdown`] additionally waits for them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use feedstore_core::{FeedStoreResult, StorageError};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinSet};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Operation {
    Read(Task),
    Barrier(Task),
}

/// FIFO scheduler with shared reads and exclusive barriers.
pub struct OperationScheduler {
    sender: Option<UnboundedSender<Operation>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl OperationScheduler {
    /// Start the dispatcher with room for `read_workers` concurrent reads.
    pub fn new(read_workers: usize) -> FeedStoreResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(read_workers.max(1))
            .thread_name("feedstore-worker")
            .build()
            .map_err(|e| StorageError::WorkerSpawn {
                reason: e.to_string(),
            })?;
        let (sender, operations) = mpsc::unbounded_channel();

        // The runtime lives on the dispatcher thread so it is never dropped
        // from inside an async context.
        let dispatcher = thread::Builder::new()
            .name("feedstore-dispatch".to_string())
            .spawn(move || drive(runtime, operations))
            .map_err(|e| StorageError::WorkerSpawn {
                reason: e.to_string(),
            })?;

        Ok(Self {
            sender: Some(sender),
            dispatcher: Some(dispatcher),
        })
    }

    /// Queue an operation that may run concurrently with other reads.
    pub fn submit_read<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Operation::Read(Box::new(task)));
    }

    /// Queue an operation that runs exclusively, after everything queued before it.
    pub fn submit_barrier<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Operation::Barrier(Box::new(task)));
    }

    fn submit(&self, operation: Operation) {
        let Some(sender) = &self.sender else {
            return;
        };
        // Only fails if the dispatcher is gone; the operation is abandoned.
        if sender.send(operation).is_err() {
            tracing::debug!("dispatcher unavailable, operation abandoned");
        }
    }

    /// Close submission and wait until every queued operation has run.
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the dispatcher drain and exit on its own.
        self.sender.take();
    }
}

impl std::fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("open", &self.sender.is_some())
            .finish()
    }
}

fn drive(runtime: Runtime, operations: UnboundedReceiver<Operation>) {
    runtime.block_on(dispatch(operations));
    tracing::trace!("dispatcher drained");
}

async fn dispatch(mut operations: UnboundedReceiver<Operation>) {
    let gate = Arc::new(RwLock::new(()));
    let mut running = JoinSet::new();

    while let Some(operation) = operations.recv().await {
        while let Some(finished) = running.try_join_next() {
            report(finished);
        }
        match operation {
            Operation::Read(task) => {
                let permit = Arc::clone(&gate).read_owned().await;
                tracing::trace!("dispatching read");
                running.spawn_blocking(move || {
                    let _permit = permit;
                    task();
                });
            }
            Operation::Barrier(task) => {
                let permit = Arc::clone(&gate).write_owned().await;
                tracing::trace!("dispatching barrier");
                running.spawn_blocking(move || {
                    let _permit = permit;
                    task();
                });
            }
        }
    }

    while let Some(finished) = running.join_next().await {
        report(finished);
    }
}

fn report(finished: Result<(), JoinError>) {
    // A panicking operation releases its permit while unwinding, so the
    // scheduler keeps serving later operations.
    if let Err(e) = finished {
        if e.is_panic() {
            tracing::warn!("scheduled operation panicked");
        }
    }
}
