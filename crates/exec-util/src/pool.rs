//! Small fixed-size worker pool for stream drain tasks
//!
//! Each worker is a plain OS thread: drain tasks do blocking reads and
//! writes, so they must not share a thread with anything that cannot wait.
//! A job goes straight to an idle worker when there is one; otherwise it
//! waits in a queue of limited size, and a full queue rejects instead of
//! blocking the caller.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use async_io::Timer;
use futures_lite::{FutureExt, future};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::PoolConfig;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of background threads running submitted jobs
///
/// Cloning gives another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    size: usize,
    queue_capacity: usize,
    queue: Sender<Job>,
    /// Workers not running a job
    idle: Arc<AtomicUsize>,
    /// Serializes the capacity check with the send
    submit_lock: Mutex<()>,
    /// Closes once every worker thread has exited
    exited: Receiver<()>,
}

impl WorkerPool {
    /// Start a pool with `size` workers and the default queue capacity
    pub fn new(size: usize) -> Result<Self> {
        Self::with_config(&PoolConfig {
            size,
            ..PoolConfig::default()
        })
    }

    /// Start a pool from a [`PoolConfig`]
    pub fn with_config(config: &PoolConfig) -> Result<Self> {
        let size = config.size.max(1);
        // Capacity is enforced in submit, where idle workers are known
        let (queue, jobs) = async_channel::unbounded::<Job>();
        let (alive, exited) = async_channel::bounded::<()>(1);
        let idle = Arc::new(AtomicUsize::new(size));

        for index in 0..size {
            let jobs = jobs.clone();
            let alive = alive.clone();
            let idle = idle.clone();
            thread::Builder::new()
                .name(format!("{}-worker-{}", config.thread_name, index))
                .spawn(move || {
                    while let Ok(job) = jobs.recv_blocking() {
                        idle.fetch_sub(1, Ordering::SeqCst);
                        job();
                        idle.fetch_add(1, Ordering::SeqCst);
                    }
                    drop(alive);
                })?;
        }

        debug!(name = %config.thread_name, size, "started worker pool");
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: config.thread_name.clone(),
                size,
                queue_capacity: config.queue_capacity,
                queue,
                idle,
                submit_lock: Mutex::new(()),
                exited,
            }),
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Name prefix of the worker threads
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `job` to run on a worker
    ///
    /// The job runs at once if a worker is idle and is queued otherwise.
    /// Fails with [`Error::PoolRejected`] when no worker is idle and the
    /// queue is full, or when the pool has been shut down. A job that panics is reported through its handle
    /// and leaves the worker alive.
    pub fn submit<T, F>(&self, task: impl Into<String>, job: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let task = task.into();
        let (done, result) = async_channel::bounded(1);

        let name = task.clone();
        let wrapped: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(value) => {
                    // The handle may be gone already; nothing to report then.
                    let _ = done.try_send(value);
                }
                Err(_) => error!(task = %name, "task panicked"),
            }
        });

        let _guard = self
            .inner
            .submit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.inner.queue.is_closed() {
            return Err(Error::pool_rejected(task, "pool is shut down"));
        }
        // Idle workers take queued jobs first; only the rest must wait.
        let idle = self.inner.idle.load(Ordering::SeqCst);
        if self.inner.queue.len() + 1 > idle + self.inner.queue_capacity {
            return Err(Error::pool_rejected(task, "queue is full"));
        }

        match self.inner.queue.try_send(wrapped) {
            Ok(()) => Ok(TaskHandle { task, result }),
            Err(TrySendError::Full(_)) => Err(Error::pool_rejected(task, "queue is full")),
            Err(TrySendError::Closed(_)) => Err(Error::pool_rejected(task, "pool is shut down")),
        }
    }

    /// Stop accepting jobs; already queued jobs still run
    pub fn shutdown(&self) {
        if self.inner.queue.close() {
            debug!(name = %self.inner.name, "worker pool shut down");
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Returns true once every worker thread has exited
    pub fn is_terminated(&self) -> bool {
        matches!(self.inner.exited.try_recv(), Err(TryRecvError::Closed))
    }

    /// Wait up to `timeout` for all workers to exit after a shutdown
    ///
    /// Returns true if they did.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let exited = self.inner.exited.clone();
        async move {
            // Workers never send; recv only returns once all of them are gone.
            let _ = exited.recv().await;
            true
        }
        .or(async {
            Timer::after(timeout).await;
            false
        })
        .await
    }

    /// Blocking version of [`await_termination`](Self::await_termination)
    pub fn await_termination_blocking(&self, timeout: Duration) -> bool {
        future::block_on(self.await_termination(timeout))
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Handle to the result of a submitted job
#[derive(Debug)]
pub struct TaskHandle<T> {
    task: String,
    result: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// The name the job was submitted under
    pub fn name(&self) -> &str {
        &self.task
    }

    /// Wait up to `timeout` for the job's result
    pub async fn join(self, timeout: Duration) -> Result<T> {
        let Self { task, result } = self;
        let outcome = async { Some(result.recv().await) }
            .or(async {
                Timer::after(timeout).await;
                None
            })
            .await;

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(_)) => Err(Error::TaskPanicked { task }),
            None => Err(Error::timeout(task, timeout)),
        }
    }

    /// Blocking version of [`join`](Self::join)
    pub fn join_blocking(self, timeout: Duration) -> Result<T> {
        future::block_on(self.join(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_submit_and_join() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.submit("answer", || 6 * 7).unwrap();
        assert_eq!(handle.name(), "answer");
        assert_eq!(handle.join_blocking(WAIT).unwrap(), 42);
        pool.shutdown();
        assert!(pool.await_termination_blocking(WAIT));
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = WorkerPool::with_config(&PoolConfig {
            size: 1,
            queue_capacity: 1,
            thread_name: "drain".to_string(),
        })
        .unwrap();
        let name = pool
            .submit("name", || thread::current().name().map(str::to_string))
            .unwrap()
            .join_blocking(WAIT)
            .unwrap();
        assert_eq!(name.as_deref(), Some("drain-worker-0"));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        assert!(pool.is_shutdown());
        let err = pool.submit("late", || ()).unwrap_err();
        assert!(matches!(err, Error::PoolRejected { .. }));
    }

    #[test]
    fn test_rejects_when_queue_full() {
        let pool = WorkerPool::with_config(&PoolConfig {
            size: 1,
            queue_capacity: 1,
            thread_name: "full".to_string(),
        })
        .unwrap();

        let (release, gate) = async_channel::bounded::<()>(1);
        let (started_tx, started_rx) = async_channel::bounded::<()>(1);
        let busy = pool
            .submit("busy", move || {
                started_tx.send_blocking(()).unwrap();
                gate.recv_blocking().ok();
            })
            .unwrap();
        started_rx.recv_blocking().unwrap();

        let queued = pool.submit("queued", || ()).unwrap();
        let err = pool.submit("overflow", || ()).unwrap_err();
        assert!(matches!(err, Error::PoolRejected { ref reason, .. } if reason == "queue is full"));

        release.send_blocking(()).unwrap();
        busy.join_blocking(WAIT).unwrap();
        queued.join_blocking(WAIT).unwrap();
    }

    #[test]
    fn test_idle_workers_do_not_use_queue_slots() {
        let pool = WorkerPool::with_config(&PoolConfig {
            size: 3,
            queue_capacity: 1,
            thread_name: "idle".to_string(),
        })
        .unwrap();

        let (release, gate) = async_channel::unbounded::<()>();
        let (started_tx, started_rx) = async_channel::unbounded::<()>();
        let busy: Vec<_> = (0..3)
            .map(|i| {
                let gate = gate.clone();
                let started = started_tx.clone();
                pool.submit(format!("busy-{i}"), move || {
                    started.send_blocking(()).unwrap();
                    gate.recv_blocking().ok();
                })
                .unwrap()
            })
            .collect();
        for _ in 0..3 {
            started_rx.recv_blocking().unwrap();
        }

        // Every worker is busy now, so the single queue slot is all that is left
        let queued = pool.submit("queued", || ()).unwrap();
        let err = pool.submit("overflow", || ()).unwrap_err();
        assert!(matches!(err, Error::PoolRejected { ref reason, .. } if reason == "queue is full"));

        for _ in 0..3 {
            release.send_blocking(()).unwrap();
        }
        for handle in busy {
            handle.join_blocking(WAIT).unwrap();
        }
        queued.join_blocking(WAIT).unwrap();
    }

    #[test]
    fn test_queued_jobs_run_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let count = count.clone();
                pool.submit(format!("job-{i}"), move || {
                    thread::sleep(Duration::from_millis(20));
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        pool.shutdown();

        assert!(pool.await_termination_blocking(WAIT));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        for handle in handles {
            handle.join_blocking(WAIT).unwrap();
        }
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let err = pool
            .submit("boom", || -> () { panic!("boom") })
            .unwrap()
            .join_blocking(WAIT)
            .unwrap_err();
        assert!(matches!(err, Error::TaskPanicked { ref task } if task == "boom"));

        let seen = Arc::new(Mutex::new(false));
        let flag = seen.clone();
        pool.submit("after", move || *flag.lock().unwrap() = true)
            .unwrap()
            .join_blocking(WAIT)
            .unwrap();
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn test_join_timeout() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .submit("slow", || thread::sleep(Duration::from_millis(500)))
            .unwrap();
        let err = handle.join_blocking(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_termination_times_out_while_busy() {
        let pool = WorkerPool::new(1).unwrap();
        let (release, gate) = async_channel::bounded::<()>(1);
        let _busy = pool
            .submit("busy", move || {
                gate.recv_blocking().ok();
            })
            .unwrap();
        pool.shutdown();
        assert!(!pool.await_termination_blocking(Duration::from_millis(50)));

        release.send_blocking(()).unwrap();
        assert!(pool.await_termination_blocking(WAIT));
    }
}
