//! The three standard streams of a process

use std::fmt;

/// Which standard stream of a child process something refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard input, written by us
    Stdin,
    /// Standard output, read by us
    Stdout,
    /// Standard error, read by us
    Stderr,
}

impl StreamKind {
    /// Short lowercase name, as used in log fields and task names
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    /// Returns true for the streams the child writes to
    pub fn is_output(self) -> bool {
        !matches!(self, StreamKind::Stdin)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
