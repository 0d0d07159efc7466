//! Forwarding process output lines to `tracing`

use tracing::{Level, Span, debug, error, info, trace, warn};

/// A function that logs one line at a fixed level
pub type LogMethod = fn(&str);

/// Pick the logging function for `level`
///
/// `tracing` macros need their level at compile time, so each level maps to
/// its own function.
pub fn log_method(level: Level) -> LogMethod {
    match level {
        Level::TRACE => |line: &str| trace!("{line}"),
        Level::DEBUG => |line: &str| debug!("{line}"),
        Level::INFO => |line: &str| info!("{line}"),
        Level::WARN => |line: &str| warn!("{line}"),
        _ => |line: &str| error!("{line}"),
    }
}

/// Logs lines at one level inside a caller-supplied span
#[derive(Debug, Clone)]
pub(crate) struct SpanLogger {
    span: Span,
    log: LogMethod,
}

impl SpanLogger {
    pub(crate) fn new(span: Span, level: Level) -> Self {
        Self {
            span,
            log: log_method(level),
        }
    }

    pub(crate) fn log(&self, line: &str) {
        let log = self.log;
        self.span.in_scope(|| log(line));
    }
}
