//! Handle to a running process

use async_io::Timer;
use async_process::{Child, ChildStderr, ChildStdin, ChildStdout};
use futures_lite::{FutureExt, future, io::BlockOn};
use std::fs::File;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::stream::StreamKind;

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

/// A process started by [`Command::spawn`](crate::Command::spawn) or [`run_cmd`](crate::run_cmd)
///
/// Dropping a `Process` does not kill the child.
#[derive(Debug)]
pub struct Process {
    child: Child,
    program: String,
    /// Read end of a stdout pipe that stderr was merged into
    merged_output: Option<File>,
    status: Option<ExitStatus>,
}

impl Process {
    pub(crate) fn new(child: Child, program: String, merged_output: Option<File>) -> Self {
        Self {
            child,
            program,
            merged_output,
            status: None,
        }
    }

    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The program this process was started from
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the standard input pipe, if it is piped and still here
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the standard output pipe, if it is piped and still here
    ///
    /// When standard error was merged into a piped standard output, the merged
    /// stream is only available through a syncer.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the standard error pipe, if it is piped and still here
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Blocking reader over an output stream, for the drain workers
    pub(crate) fn take_output_reader(&mut self, stream: StreamKind) -> Option<Box<dyn Read + Send>> {
        match stream {
            StreamKind::Stdout => match self.merged_output.take() {
                Some(file) => Some(Box::new(file)),
                None => self
                    .take_stdout()
                    .map(|s| Box::new(BlockOn::new(s)) as Box<dyn Read + Send>),
            },
            StreamKind::Stderr => self
                .take_stderr()
                .map(|s| Box::new(BlockOn::new(s)) as Box<dyn Read + Send>),
            StreamKind::Stdin => None,
        }
    }

    /// Blocking writer over standard input, for the drain workers
    pub(crate) fn take_input_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.take_stdin()
            .map(|s| Box::new(BlockOn::new(s)) as Box<dyn Write + Send>)
    }

    /// The exit status, once the process has been seen to exit
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        self.status.as_ref()
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = &self.status {
            return Ok(Some(status.clone()));
        }
        let status = self.child.try_status()?.map(ExitStatus::from);
        self.status.clone_from(&status);
        Ok(status)
    }

    /// Returns true while the process has not exited
    ///
    /// Fails if the exit status could not be checked.
    pub fn is_alive(&mut self) -> Result<bool> {
        Ok(self.try_wait()?.is_none())
    }

    /// Wait for the process to complete and return its exit status
    ///
    /// A standard input pipe that nobody took is closed first, so a child
    /// reading its input sees end of file.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = &self.status {
            return Ok(status.clone());
        }
        let status: ExitStatus = self.child.status().await?.into();
        self.status = Some(status.clone());
        Ok(status)
    }

    /// Wait for the process for at most `timeout`, `None` if it is still running
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let waited = async { Some(self.wait().await) }
            .or(async {
                Timer::after(timeout).await;
                None
            })
            .await;
        waited.transpose()
    }

    /// Blocking version of [`wait`](Self::wait)
    pub fn wait_blocking(&mut self) -> Result<ExitStatus> {
        future::block_on(self.wait())
    }

    /// Blocking version of [`wait_timeout`](Self::wait_timeout)
    pub fn wait_timeout_blocking(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        future::block_on(self.wait_timeout(timeout))
    }

    /// Forcefully stop the process (SIGKILL on Unix)
    pub fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .map_err(|e| Error::signal_failed(9, e.to_string()))
    }

    /// Ask the process to stop (SIGTERM on Unix, a kill elsewhere)
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            signal::kill(pid, Signal::SIGTERM)
                .map_err(|e| Error::signal_failed(15, e.to_string()))?;
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))?;
        }

        Ok(())
    }
}
