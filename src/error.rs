//! Error types for cpulaunch
//!
//! Only structurally invalid input ends up here. Missing libraries, unknown
//! allocator names and environment conflicts are recovered inside the
//! launcher and surface as log lines instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for launcher operations
#[derive(Error, Debug)]
pub enum LaunchError {
    /// A range-list token could not be split into integers
    #[error("Invalid range format detected in '{token}': {reason}")]
    InvalidRange { token: String, reason: String },

    /// A range whose low bound exceeds its high bound
    #[error("Beginning index of a range must be <= ending index: {begin}-{end}")]
    RangeOrder { begin: usize, end: usize },

    /// lscpu output could not be interpreted
    #[error("Failed to parse CPU topology: {0}")]
    TopologyParse(String),

    /// No topology source produced any core
    #[error("CPU topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// Requested NUMA node does not exist
    #[error("NUMA node {node} not found, available nodes are {available:?}")]
    UnknownNode { node: usize, available: Vec<usize> },

    /// Requested logical CPU does not exist
    #[error("Logical CPU {0} not found in the topology")]
    UnknownCore(usize),

    /// Partition request cannot be satisfied
    #[error("Insufficient cores: {0}")]
    InsufficientCores(String),

    /// A preference list must hold at least 'auto' and a default choice
    #[error("Invalid preference list for {category}: {reason}")]
    InvalidPreferenceList { category: String, reason: String },

    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Workload process could not be started
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LaunchError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a range format error
    pub fn invalid_range(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Create a spawn error
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error was caused by user input rather than the machine
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::RangeOrder { .. }
                | Self::UnknownNode { .. }
                | Self::UnknownCore(_)
                | Self::InsufficientCores(_)
                | Self::ConfigError(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for launcher operations
pub type Result<T> = std::result::Result<T, LaunchError>;

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        LaunchError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        LaunchError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| LaunchError::io(path, e))
    }
}
