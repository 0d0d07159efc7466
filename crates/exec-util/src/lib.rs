//! Launch external processes and keep their standard streams moving
//!
//! A child process that writes more output than its pipe buffer holds stops
//! until someone reads it. This crate starts processes and drains stdout and
//! stderr (and feeds stdin) on a small worker pool while the caller waits for
//! the exit, either blocking or as a future.
//!
//! ```no_run
//! use exec_util::run_cmd;
//! use tracing::info_span;
//!
//! let process = run_cmd(["java", "--version"], |_| {})?
//!     .sync(|syncer| {
//!         syncer.with_logger(info_span!("java"));
//!     })?;
//! assert!(process.exit_status().is_some_and(|s| s.success()));
//! # Ok::<(), exec_util::Error>(())
//! ```

#![warn(missing_docs)]

pub mod charset;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod process;
pub mod stream;
pub mod sync;
pub mod syncer;

pub use charset::{Charset, DecodeReader, LINE_SEPARATOR, TextReader, TextWriter};
pub use command::{Command, CommandBuilder, Redirect, run_cmd};
pub use config::{PoolConfig, SyncOptions};
pub use error::{Error, Result};
pub use logging::{LogMethod, log_method};
pub use pool::{TaskHandle, WorkerPool};
pub use process::{ExitStatus, Process};
pub use stream::StreamKind;
pub use syncer::{InputHandler, OutputHandler, ProcessSyncer, SyncTasks};
