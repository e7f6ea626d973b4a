//! Bounded fan-out/fan-in of per-target operations.
//!
//! Every target gets its own task, so slow hosts never hold up submission of
//! work to other hosts. Each task must take a slot from the [`SlotPool`]
//! before running its operation, which caps the number of live remote
//! operations at the pool capacity. Results flow back over a channel in
//! completion order and the stream ends only after every task has finished.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::executor::{ExecRequest, JobResult, Outcome, RemoteExecutor, Target};

/// Buffer size of the result channel.
const RESULT_BUFFER: usize = 32;

/// Fixed-capacity gate limiting concurrently active operations.
///
/// Clones share the same slots. Pools created separately are independent.
#[derive(Debug, Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SlotPool {
    /// Create a pool with `capacity` slots. A capacity of zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a free slot. The slot is released when the returned guard drops.
    pub async fn acquire(&self) -> Result<Slot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        Ok(Slot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held slot in a [`SlotPool`].
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Stream of per-target results in completion order.
pub struct ResultStream {
    rx: mpsc::Receiver<JobResult>,
    expected: usize,
}

impl ResultStream {
    /// Next finished result, or `None` once every target has reported.
    pub async fn next(&mut self) -> Option<JobResult> {
        self.rx.recv().await
    }

    /// Number of results this stream will yield in total.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<JobResult> {
        let mut results = Vec::with_capacity(self.expected);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}

/// Runs one operation per target, bounded by a slot pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: SlotPool,
}

impl Dispatcher {
    pub fn new(pool: SlotPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// Spawn one unit of work per target and return the stream of results.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch<F, Fut>(&self, targets: Vec<Target>, operation: F) -> ResultStream
    where
        F: Fn(Target) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let expected = targets.len();
        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let operation = Arc::new(operation);
        let mut units = JoinSet::new();

        debug!(
            "Dispatching {} targets across {} slots",
            expected,
            self.pool.capacity()
        );

        for target in targets {
            let pool = self.pool.clone();
            let tx = tx.clone();
            let operation = operation.clone();
            units.spawn(async move {
                let outcome = run_unit(&pool, &target, operation.as_ref()).await;
                if tx.send(JobResult::new(target, outcome)).await.is_err() {
                    debug!("Result receiver dropped, discarding result");
                }
            });
        }

        // The original sender lives until every unit has finished, so the
        // consumer only sees end-of-stream after the last result.
        tokio::spawn(async move {
            while let Some(joined) = units.join_next().await {
                if let Err(e) = joined {
                    error!("Unit of work did not complete: {}", e);
                }
            }
            drop(tx);
        });

        ResultStream { rx, expected }
    }

    /// Run `request` on every target through `executor`.
    pub fn run_command(
        &self,
        targets: Vec<Target>,
        executor: Arc<dyn RemoteExecutor>,
        request: ExecRequest,
    ) -> ResultStream {
        let request = Arc::new(request);
        self.dispatch(targets, move |target| {
            let executor = executor.clone();
            let request = request.clone();
            async move { executor.execute(&target, &request).await }
        })
    }
}

/// Acquire a slot, run the operation, release the slot.
///
/// The operation runs in its own task so a panic is reported as a failure
/// for this target instead of losing its result.
async fn run_unit<F, Fut>(pool: &SlotPool, target: &Target, operation: &F) -> Outcome
where
    F: Fn(Target) -> Fut,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    let slot = match pool.acquire().await {
        Ok(slot) => slot,
        Err(e) => return Outcome::from(Err::<Vec<u8>, _>(e)),
    };

    debug!("Running operation on {}", target);
    let result = match tokio::spawn(operation(target.clone())).await {
        Ok(result) => result,
        Err(e) => Err(Error::Worker(e.to_string())),
    };
    drop(slot);

    Outcome::from(result)
}
