//! Bounded task pool.
//!
//! A fixed set of worker tasks drains a shared queue. Two independent knobs
//! control it:
//!
//! - **parallelism**: `workers` tasks execute at most `workers` handlers at
//!   once;
//! - **buffering**: a counting semaphore sized to `queue_capacity` caps the
//!   outstanding work (queued plus executing). `submit` acquires a permit
//!   before enqueueing and the permit is released once the worker has
//!   acknowledged the task.
//!
//! ## Lifecycle
//!
//! ```text
//! start ──► submit* ──► shutdown
//!                         │ one sentinel per worker
//!                         │ wait for every item to be acknowledged
//!                         └ join every worker
//! ```
//!
//! Tasks are never dropped. A task whose handler fails or panics still
//! produces an [`OperationResult`], and the worker moves on to the next one.

use faultline_types::{FailureKind, OperationResult, Outcome};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::{HarnessError, Result};
use crate::task::{Task, TaskHandler};
use crate::window::FaultWindow;

/// Sender side of a pool's result channel.
pub type ResultTx = mpsc::UnboundedSender<OperationResult>;

/// Receiver side of a pool's result channel.
pub type ResultRx = mpsc::UnboundedReceiver<OperationResult>;

enum QueueItem {
    Run {
        task: Task,
        // Released after the task is acknowledged.
        _permit: Option<OwnedSemaphorePermit>,
    },
    Stop,
}

/// Count of admitted items not yet acknowledged by a worker.
#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to a running pool.
pub struct TaskPool {
    name: String,
    queue: mpsc::UnboundedSender<QueueItem>,
    admission: Option<Arc<Semaphore>>,
    outstanding: Arc<Outstanding>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    shut_down: AtomicBool,
    // Held for read across a submit's check-and-enqueue, for write while
    // shutdown raises the flag.
    admitting: RwLock<()>,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("worker_count", &self.worker_count)
            .field("outstanding", &self.outstanding.get())
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TaskPool {
    /// Spawn `config.workers` workers.
    ///
    /// Each completed task is timestamped against `window` and sent on
    /// `results`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidWorkerCount` if `config.workers` is zero.
    pub fn start(
        name: &str,
        config: &PoolConfig,
        handler: Arc<dyn TaskHandler>,
        window: FaultWindow,
        results: ResultTx,
    ) -> Result<Self> {
        if config.workers == 0 {
            return Err(HarnessError::InvalidWorkerCount(config.workers));
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let outstanding = Arc::new(Outstanding::default());
        let admission = (config.queue_capacity > 0)
            .then(|| Arc::new(Semaphore::new(config.queue_capacity)));

        let workers = (0..config.workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&rx),
                    Arc::clone(&handler),
                    window.clone(),
                    results.clone(),
                    Arc::clone(&outstanding),
                ))
            })
            .collect();

        tracing::info!(
            "Pool {} started: {} workers, queue capacity {}",
            name,
            config.workers,
            config.queue_capacity
        );

        Ok(Self {
            name: name.to_string(),
            queue,
            admission,
            outstanding,
            workers: Mutex::new(workers),
            worker_count: config.workers,
            shut_down: AtomicBool::new(false),
            admitting: RwLock::new(()),
        })
    }

    /// Pool name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Items admitted but not yet acknowledged (queued plus executing).
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Returns true once `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Enqueue a task, waiting for an admission permit if the pool is full.
    ///
    /// # Errors
    ///
    /// `PoolShutDown` if the pool has been shut down.
    pub async fn submit(&self, task: Task) -> Result<()> {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }

        let permit = match &self.admission {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| self.shut_down_error())?,
            ),
            None => None,
        };

        // Shutdown may have started while this call waited for a permit.
        let _admitting = self.admitting.read().await;
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }

        tracing::debug!("Pool {}: submitting {} {}", self.name, task.id, task.operation);
        self.outstanding.add();
        if self
            .queue
            .send(QueueItem::Run {
                task,
                _permit: permit,
            })
            .is_err()
        {
            self.outstanding.done();
            return Err(self.shut_down_error());
        }
        Ok(())
    }

    /// Stop the pool after every submitted task has completed.
    ///
    /// Enqueues one sentinel per worker, waits until every item has been
    /// acknowledged, then joins the workers. In-flight tasks are never
    /// interrupted.
    ///
    /// # Errors
    ///
    /// `PoolAlreadyShutDown` on a second call; `WorkerJoin` if a worker task
    /// could not be joined.
    pub async fn shutdown(&self) -> Result<()> {
        let admitting = self.admitting.write().await;
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::error!("Pool {}: shutdown called twice", self.name);
            return Err(HarnessError::PoolAlreadyShutDown {
                pool: self.name.clone(),
            });
        }
        drop(admitting);

        for _ in 0..self.worker_count {
            self.outstanding.add();
            if self.queue.send(QueueItem::Stop).is_err() {
                // Every worker is gone already; nothing will acknowledge it.
                self.outstanding.done();
            }
        }

        self.outstanding.wait_idle().await;
        tracing::info!("Pool {}: all workers stopped", self.name);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for (worker, handle) in handles.into_iter().enumerate() {
            handle.await.map_err(|e| HarnessError::WorkerJoin {
                pool: self.name.clone(),
                worker,
                reason: e.to_string(),
            })?;
        }
        tracing::info!("Pool {}: joined {} workers", self.name, self.worker_count);

        if let Some(semaphore) = &self.admission {
            semaphore.close();
        }
        Ok(())
    }

    fn shut_down_error(&self) -> HarnessError {
        HarnessError::PoolShutDown {
            pool: self.name.clone(),
        }
    }
}

async fn worker_loop(
    index: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    handler: Arc<dyn TaskHandler>,
    window: FaultWindow,
    results: ResultTx,
    outstanding: Arc<Outstanding>,
) {
    loop {
        let item = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        match item {
            Some(QueueItem::Run { task, _permit }) => {
                let result = execute(handler.as_ref(), &window, task).await;
                if !result.is_success() {
                    tracing::warn!("Worker {}: {}", index, result);
                }
                if let Err(lost) = results.send(result) {
                    tracing::warn!("Worker {}: result collector gone; dropped {}", index, lost.0);
                }
                outstanding.done();
                drop(_permit);
            }
            Some(QueueItem::Stop) => {
                outstanding.done();
                tracing::debug!("Worker {}: stop received", index);
                break;
            }
            None => break,
        }
    }
}

/// Run one task and build its result.
async fn execute(handler: &dyn TaskHandler, window: &FaultWindow, task: Task) -> OperationResult {
    let phase_at_start = window.phase();
    let started_at = window.elapsed();

    let outcome = match AssertUnwindSafe(handler.handle(&task)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Outcome::failure(
            FailureKind::Panicked,
            format!("handler panicked: {}", panic_message(panic.as_ref())),
        ),
    };

    let finished_at = window.elapsed();
    OperationResult::new(
        task.id,
        &task.stream,
        &task.operation,
        outcome,
        started_at,
        finished_at,
        phase_at_start,
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
