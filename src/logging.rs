//! Structured logging glue, grounded on the teacher crate's own `flux::logging` module: a thin
//! wrapper around `slog` that gives the rest of the crate a stable `Logger` type and a
//! terminal-backed default, without forcing a logging backend choice on embedders.

pub use slog::{o, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// The seven log channels the control socket distinguishes on its downward interface. These are
/// carried as a `"channel"` key-value pair rather than folded into `slog`'s five severities,
/// since e.g. `Command` and `DebugInfo` are different audiences, not different urgencies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogLevel {
    Reply,
    Error,
    DebugWarning,
    DebugInfo,
    DebugVerbose,
    Command,
    Status,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Reply => "reply",
            LogLevel::Error => "error",
            LogLevel::DebugWarning => "debug_warning",
            LogLevel::DebugInfo => "debug_info",
            LogLevel::DebugVerbose => "debug_verbose",
            LogLevel::Command => "command",
            LogLevel::Status => "status",
        }
    }
}

/// Logs `text` against `log` at the channel implied by `level`, tagging the record with the
/// channel name so a consuming application can filter independently of `slog` severity.
pub fn log_line(log: &Logger, level: LogLevel, text: &str) {
    let tag = level.tag();
    match level {
        LogLevel::Error => slog::error!(log, "{}", text; "channel" => tag),
        LogLevel::DebugWarning => slog::warn!(log, "{}", text; "channel" => tag),
        LogLevel::Reply | LogLevel::Status | LogLevel::Command => {
            slog::info!(log, "{}", text; "channel" => tag)
        }
        LogLevel::DebugInfo => slog::debug!(log, "{}", text; "channel" => tag),
        LogLevel::DebugVerbose => slog::trace!(log, "{}", text; "channel" => tag),
    }
}

/// Builds a default terminal logger at debug severity, used when an embedder does not supply its
/// own root `Logger`.
pub fn default_root_logger() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build default logger")
}
