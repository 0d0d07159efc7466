//! Reading stdout and stderr and writing stdin of a running process in parallel
//!
//! A [`ProcessSyncer`] only records what should happen to each stream. Once
//! the process is running, [`ProcessSyncer::start`] submits one drain task per
//! stream to a [`WorkerPool`], and [`SyncTasks::join`] waits for them after
//! the process has exited.

use std::io::{self, BufRead, Write};
use std::time::Duration;
use tracing::{Level, Span, debug};

use crate::charset::{Charset, TextReader, TextWriter};
use crate::error::{Error, Result};
use crate::logging::SpanLogger;
use crate::pool::{TaskHandle, WorkerPool};
use crate::process::Process;
use crate::stream::StreamKind;

/// Handler for one output stream
pub type OutputHandler = Box<dyn FnOnce(&mut TextReader) -> io::Result<()> + Send + 'static>;

/// Handler for the input stream
pub type InputHandler = Box<dyn FnOnce(&mut TextWriter) -> io::Result<()> + Send + 'static>;

struct Registered<H> {
    charset: Charset,
    handler: H,
}

/// What to do with each standard stream of a running process
///
/// Registering a handler for a stream replaces the one set before.
///
/// ```no_run
/// use exec_util::{Charset, run_cmd};
///
/// run_cmd(["bash"], |_| {})?.sync(|syncer| {
///     syncer.with_inputs(["echo hello", "exit"]);
///     syncer.on_stdout_each_line(Charset::utf_8(), |line| println!("{line}"));
/// })?;
/// # Ok::<(), exec_util::Error>(())
/// ```
#[derive(Default)]
pub struct ProcessSyncer {
    stdout: Option<Registered<OutputHandler>>,
    stderr: Option<Registered<OutputHandler>>,
    stdin: Option<Registered<InputHandler>>,
}

impl ProcessSyncer {
    /// A syncer with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Read standard output with `handler`, decoding it from `charset`
    pub fn on_stdout<F>(&mut self, charset: Charset, handler: F) -> &mut Self
    where
        F: FnOnce(&mut TextReader) -> io::Result<()> + Send + 'static,
    {
        self.stdout = Some(Registered {
            charset,
            handler: Box::new(handler),
        });
        self
    }

    /// Read standard error with `handler`, decoding it from `charset`
    pub fn on_stderr<F>(&mut self, charset: Charset, handler: F) -> &mut Self
    where
        F: FnOnce(&mut TextReader) -> io::Result<()> + Send + 'static,
    {
        self.stderr = Some(Registered {
            charset,
            handler: Box::new(handler),
        });
        self
    }

    /// Write standard input with `handler`, encoding it into `charset`
    ///
    /// The pipe is flushed and closed once the handler returns.
    pub fn on_stdin<F>(&mut self, charset: Charset, handler: F) -> &mut Self
    where
        F: FnOnce(&mut TextWriter) -> io::Result<()> + Send + 'static,
    {
        self.stdin = Some(Registered {
            charset,
            handler: Box::new(handler),
        });
        self
    }

    /// Call `handler` with every line of standard output
    pub fn on_stdout_each_line<F>(&mut self, charset: Charset, handler: F) -> &mut Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_stdout(charset, each_line(handler))
    }

    /// Call `handler` with every line of standard error
    pub fn on_stderr_each_line<F>(&mut self, charset: Charset, handler: F) -> &mut Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_stderr(charset, each_line(handler))
    }

    /// Drain and discard standard output and standard error
    ///
    /// Useful when the output is not needed but the process must not stall on
    /// a full pipe.
    pub fn silently(&mut self) -> &mut Self {
        self.on_stdout(Charset::utf_8(), |reader| reader.discard().map(drop));
        self.on_stderr(Charset::utf_8(), |reader| reader.discard().map(drop))
    }

    /// Log standard output at INFO and standard error at DEBUG inside `span`
    pub fn with_logger(&mut self, span: Span) -> &mut Self {
        self.with_logger_levels(span, Level::INFO, Level::DEBUG)
    }

    /// Log standard output and standard error at the given levels inside `span`
    pub fn with_logger_levels(
        &mut self,
        span: Span,
        stdout_level: Level,
        stderr_level: Level,
    ) -> &mut Self {
        self.with_logger_in(Charset::utf_8(), span, stdout_level, stderr_level)
    }

    /// Like [`with_logger_levels`](Self::with_logger_levels), decoding both
    /// streams from `charset`
    pub fn with_logger_in(
        &mut self,
        charset: Charset,
        span: Span,
        stdout_level: Level,
        stderr_level: Level,
    ) -> &mut Self {
        let out = SpanLogger::new(span.clone(), stdout_level);
        self.on_stdout_each_line(charset, move |line| out.log(line));
        let err = SpanLogger::new(span, stderr_level);
        self.on_stderr_each_line(charset, move |line| err.log(line))
    }

    /// Write each of `lines` to standard input in UTF-8
    pub fn with_inputs<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_inputs_in(Charset::utf_8(), lines)
    }

    /// Write each of `lines` to standard input in `charset`
    pub fn with_inputs_in<I, S>(&mut self, charset: Charset, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        self.on_stdin(charset, move |writer| {
            for line in &lines {
                writer.write_line(line)?;
            }
            Ok(())
        })
    }

    /// Returns true if a handler is registered for `stream`
    pub fn has_handler(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Stdout => self.stdout.is_some(),
            StreamKind::Stderr => self.stderr.is_some(),
            StreamKind::Stdin => self.stdin.is_some(),
        }
    }

    /// Submit a drain task for every stream that has a handler and a pipe
    ///
    /// Streams without a pipe (redirected, merged, or already taken) are
    /// skipped along with their handlers.
    pub fn start(self, process: &mut Process, pool: &WorkerPool) -> Result<SyncTasks> {
        let pid = process.pid();
        let mut tasks = SyncTasks::default();

        if let Some(Registered { charset, handler }) = self.stdout {
            if let Some(reader) = process.take_output_reader(StreamKind::Stdout) {
                tasks.stdout = Some(submit_output(
                    pool,
                    pid,
                    StreamKind::Stdout,
                    reader,
                    charset,
                    handler,
                )?);
            }
        }
        if let Some(Registered { charset, handler }) = self.stderr {
            if let Some(reader) = process.take_output_reader(StreamKind::Stderr) {
                tasks.stderr = Some(submit_output(
                    pool,
                    pid,
                    StreamKind::Stderr,
                    reader,
                    charset,
                    handler,
                )?);
            }
        }
        if let Some(Registered { charset, handler }) = self.stdin {
            if let Some(writer) = process.take_input_writer() {
                tasks.stdin = Some(submit_input(pool, pid, writer, charset, handler)?);
            }
        }

        debug!(pid, tasks = tasks.len(), "started stream drains");
        Ok(tasks)
    }
}

fn each_line<F>(mut handler: F) -> impl FnOnce(&mut TextReader) -> io::Result<()> + Send + 'static
where
    F: FnMut(&str) + Send + 'static,
{
    move |reader: &mut TextReader| {
        for line in reader.lines() {
            handler(&line?);
        }
        Ok(())
    }
}

fn submit_output(
    pool: &WorkerPool,
    pid: u32,
    stream: StreamKind,
    reader: Box<dyn io::Read + Send>,
    charset: Charset,
    handler: OutputHandler,
) -> Result<TaskHandle<io::Result<()>>> {
    pool.submit(format!("{stream} drain of process {pid}"), move || {
        let mut reader = TextReader::new(reader, charset);
        let result = handler(&mut reader);
        debug!(pid, %stream, ok = result.is_ok(), "drain finished");
        result
    })
}

fn submit_input(
    pool: &WorkerPool,
    pid: u32,
    writer: Box<dyn Write + Send>,
    charset: Charset,
    handler: InputHandler,
) -> Result<TaskHandle<io::Result<()>>> {
    pool.submit(format!("stdin feed of process {pid}"), move || {
        let mut writer = TextWriter::new(writer, charset);
        let result = handler(&mut writer).and_then(|()| writer.finish()?.flush());
        match result {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(pid, "process closed stdin before all input was written");
                Ok(())
            }
            other => {
                debug!(pid, ok = other.is_ok(), "stdin feed finished");
                other
            }
        }
    })
}

/// Drain tasks started by [`ProcessSyncer::start`]
#[derive(Debug, Default)]
pub struct SyncTasks {
    stdout: Option<TaskHandle<io::Result<()>>>,
    stderr: Option<TaskHandle<io::Result<()>>>,
    stdin: Option<TaskHandle<io::Result<()>>>,
}

impl SyncTasks {
    /// Number of running drain tasks
    pub fn len(&self) -> usize {
        [
            self.stdout.is_some(),
            self.stderr.is_some(),
            self.stdin.is_some(),
        ]
        .into_iter()
        .filter(|started| *started)
        .count()
    }

    /// Returns true if no drain task was started
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every task, each for at most `timeout`
    ///
    /// Tasks are joined in stdout, stderr, stdin order; the first failure is
    /// returned.
    pub async fn join(self, timeout: Duration) -> Result<()> {
        let tasks = [
            (StreamKind::Stdout, self.stdout),
            (StreamKind::Stderr, self.stderr),
            (StreamKind::Stdin, self.stdin),
        ];
        for (stream, task) in tasks {
            let Some(task) = task else { continue };
            task.join(timeout)
                .await?
                .map_err(|source| Error::Drain { stream, source })?;
        }
        Ok(())
    }

    /// Blocking version of [`join`](Self::join)
    pub fn join_blocking(self, timeout: Duration) -> Result<()> {
        futures_lite::future::block_on(self.join(timeout))
    }
}
