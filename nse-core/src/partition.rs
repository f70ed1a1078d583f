//! Partition executor.
//!
//! Backs both the tick-ingest worker pool and the SMS `EntryCoordinator`/
//! `ExitCoordinator`: a fixed number of partitions, each with its own serial
//! task queue, selected by hashing the partition key (symbol or trade id).
//! Work inside one partition runs strictly in order; work across partitions
//! runs concurrently with no ordering guarantee, per the spec's concurrency
//! model.

use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

type Task = Pin<Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>>;

/// A pool of `partition_count` single-consumer queues. `execute(key, fut)`
/// schedules `fut` onto the partition selected by `key`'s hash; tasks
/// submitted to the same partition run one at a time, in submission order.
#[derive(Debug, Clone)]
pub struct PartitionExecutor {
    senders: Arc<Vec<mpsc::UnboundedSender<Task>>>,
}

impl PartitionExecutor {
    /// Spawns `partition_count` serial worker tasks on the current Tokio
    /// runtime. Defaults to `max(8, available_parallelism)` when the caller
    /// passes `0`.
    pub fn spawn(partition_count: usize) -> (Self, Vec<JoinHandle<()>>) {
        let count = if partition_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
                .max(8)
        } else {
            partition_count
        };

        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for idx in 0..count {
            let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
            senders.push(tx);
            handles.push(tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    task().await;
                }
                warn!(partition = idx, "partition queue closed");
            }));
        }

        (
            Self {
                senders: Arc::new(senders),
            },
            handles,
        )
    }

    fn partition_of<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = fnv::FnvHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Schedules `fut` on the partition owned by `key`. Returns an error if
    /// the partition's worker has shut down.
    pub fn execute<K, F, Fut>(&self, key: &K, fut: F) -> Result<(), crate::error::CoreError>
    where
        K: Hash,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let idx = self.partition_of(key);
        let boxed: Task = Box::new(move || Box::pin(fut()));
        self.senders[idx]
            .send(boxed)
            .map_err(|_| crate::error::CoreError::PartitionClosed)
    }

    pub fn partition_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn tasks_for_same_key_run_in_submission_order() {
        let (exec, _handles) = PartitionExecutor::spawn(4);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..20u64 {
            let order = order.clone();
            exec.execute(&"RELIANCE".to_string(), move || async move {
                order.lock().unwrap().push(i);
            })
            .unwrap();
        }

        // Give the partition worker time to drain; deterministic enough for
        // a single-partition-key ordering check.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn same_key_always_maps_to_same_partition() {
        let (exec, _handles) = PartitionExecutor::spawn(8);
        let a = exec.partition_of(&"INFY".to_string());
        let b = exec.partition_of(&"INFY".to_string());
        assert_eq!(a, b);
        let _ = AtomicU64::new(0);
    }
}
