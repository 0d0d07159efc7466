//! Waiting on a running process while its streams are drained
//!
//! Every entry point follows the same steps: register a discard-everything
//! handler for stdout and stderr, let the caller's setup override it, start
//! the drain tasks, wait for the process, then join the drains. Pools created
//! here are shut down and awaited; a pool passed in by the caller is left
//! running for the caller to manage.

use futures_lite::future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SyncOptions;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::process::Process;
use crate::syncer::ProcessSyncer;

impl Process {
    /// Wait for this process with default [`SyncOptions`] on a temporary pool
    ///
    /// `setup` configures the stream handlers; anything it leaves unset on
    /// stdout or stderr is drained and discarded.
    pub fn sync<F>(self, setup: F) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        self.sync_with(&SyncOptions::default(), setup)
    }

    /// Wait for this process on a temporary pool built from `options`
    pub fn sync_with<F>(self, options: &SyncOptions, setup: F) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        let pool = WorkerPool::with_config(&options.pool)?;
        future::block_on(self.drive(
            &pool,
            PoolOwnership::Owned,
            options,
            Some(options.process_timeout),
            setup,
        ))
    }

    /// Wait for this process using a pool the caller owns
    ///
    /// The pool is not shut down.
    pub fn sync_on<F>(self, pool: &WorkerPool, options: &SyncOptions, setup: F) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        future::block_on(self.drive(
            pool,
            PoolOwnership::Borrowed,
            options,
            Some(options.process_timeout),
            setup,
        ))
    }

    /// Asynchronous [`sync`](Self::sync)
    ///
    /// The process exit is the completion event, so no process timeout
    /// applies; the drain and pool timeouts still do.
    pub async fn sync_async<F>(self, setup: F) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        self.sync_async_with(&SyncOptions::default(), setup).await
    }

    /// Asynchronous [`sync_with`](Self::sync_with)
    pub async fn sync_async_with<F>(self, options: &SyncOptions, setup: F) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        let pool = WorkerPool::with_config(&options.pool)?;
        self.drive(&pool, PoolOwnership::Owned, options, None, setup)
            .await
    }

    /// Asynchronous [`sync_on`](Self::sync_on)
    pub async fn sync_async_on<F>(
        self,
        pool: &WorkerPool,
        options: &SyncOptions,
        setup: F,
    ) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        self.drive(pool, PoolOwnership::Borrowed, options, None, setup)
            .await
    }

    async fn drive<F>(
        mut self,
        pool: &WorkerPool,
        ownership: PoolOwnership,
        options: &SyncOptions,
        process_timeout: Option<Duration>,
        setup: F,
    ) -> Result<Process>
    where
        F: FnOnce(&mut ProcessSyncer),
    {
        let mut syncer = ProcessSyncer::new();
        syncer.silently();
        setup(&mut syncer);

        let started = syncer.start(&mut self, pool);
        if ownership == PoolOwnership::Owned {
            pool.shutdown();
        }
        let tasks = match started {
            Ok(tasks) => tasks,
            Err(e) => {
                // Drains that did start end once the child's pipes close
                warn!(
                    pid = self.pid(),
                    error = %e,
                    "failed to start stream drains, killing process"
                );
                if let Err(kill_err) = self.kill() {
                    debug!(pid = self.pid(), error = %kill_err, "kill failed");
                }
                if let Err(wait_err) = self.wait().await {
                    debug!(pid = self.pid(), error = %wait_err, "wait after kill failed");
                }
                return Err(e);
            }
        };

        match process_timeout {
            Some(timeout) => {
                if self.wait_timeout(timeout).await?.is_none() {
                    warn!(
                        pid = self.pid(),
                        program = %self.program(),
                        ?timeout,
                        "process still running after timeout"
                    );
                    if options.kill_on_timeout {
                        warn!(pid = self.pid(), "killing process");
                        self.kill()?;
                        self.wait().await?;
                    }
                }
            }
            None => {
                self.wait().await?;
            }
        }

        // Drains end shortly after the process closes its pipes.
        tasks.join(options.drain_timeout).await?;

        if ownership == PoolOwnership::Owned
            && !pool.await_termination(options.shutdown_timeout).await
        {
            warn!(
                pool = %pool.name(),
                timeout = ?options.shutdown_timeout,
                "worker pool did not terminate in time"
            );
        }

        debug!(pid = self.pid(), status = ?self.exit_status(), "process synced");
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolOwnership {
    Owned,
    Borrowed,
}
