//! Injectable log sink for launcher decisions
//!
//! Every recoverable condition the launcher runs into (unknown names,
//! missing libraries, environment conflicts) is reported through a
//! [`LaunchLogger`]. Embedders that do not care get [`StdoutLogger`].

use std::fmt;

/// Severity of a launcher message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Something was substituted or overridden
    Warning,
    /// A decision was made
    Info,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Info => write!(f, "info"),
        }
    }
}

/// Capability set used to surface launcher decisions
pub trait LaunchLogger: Send + Sync {
    /// Report a recovered problem
    fn warn(&self, msg: &str);

    /// Report a decision
    fn info(&self, msg: &str);

    /// Dispatch on level
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Warning => self.warn(msg),
            LogLevel::Info => self.info(msg),
        }
    }
}

/// Prints every message to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutLogger;

impl LaunchLogger for StdoutLogger {
    fn warn(&self, msg: &str) {
        println!("{}", msg);
    }

    fn info(&self, msg: &str) {
        println!("{}", msg);
    }
}

/// Forwards to the `tracing` subscriber installed by the binary
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl LaunchLogger for TracingLogger {
    fn warn(&self, msg: &str) {
        tracing::warn!("{}", msg);
    }

    fn info(&self, msg: &str) {
        tracing::info!("{}", msg);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingLogger;
    use super::*;

    #[test]
    fn test_log_dispatches_by_level() {
        let logger = RecordingLogger::default();
        logger.log(LogLevel::Warning, "w");
        logger.log(LogLevel::Info, "i");
        assert_eq!(logger.warnings(), vec!["w"]);
        assert_eq!(logger.infos(), vec!["i"]);
    }
}
