use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for plotmove operations
#[derive(Error, Debug)]
pub enum PlotMoveError {
    // Environment errors, fatal to the whole run
    #[error("None of the source directories exist: {paths:?}")]
    NoSourceDirectory { paths: Vec<PathBuf> },

    #[error("Destination directory unavailable: {path}")]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Per-file errors, fatal to one task only
    #[error("Failed to claim {path}: {source}")]
    ClaimFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finalize {path}: {source}")]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cross-device rename not possible: {source_path} -> {destination}")]
    CrossDevice {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("Insufficient disk space: need {required} bytes, available {available} bytes")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Resume offset {offset} exceeds total size {total_size} for {path}")]
    InvalidResumeOffset {
        path: PathBuf,
        offset: u64,
        total_size: u64,
    },

    #[error("Size mismatch for {path}: expected {expected} bytes, found {actual} bytes")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Not a plot file name: {path}")]
    NotAPlot { path: PathBuf },

    // Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Monitoring error: {reason}")]
    MonitoringError { reason: String },

    #[error("Filesystem error on path {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<prometheus::Error> for PlotMoveError {
    fn from(e: prometheus::Error) -> Self {
        PlotMoveError::MonitoringError {
            reason: e.to_string(),
        }
    }
}

impl PlotMoveError {
    /// Environment errors end the scan loop; everything else only ends the
    /// current task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlotMoveError::NoSourceDirectory { .. } | PlotMoveError::DestinationUnavailable { .. }
        )
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlotMoveError::NoSourceDirectory { .. }
            | PlotMoveError::DestinationUnavailable { .. } => ErrorSeverity::Critical,
            PlotMoveError::SizeMismatch { .. }
            | PlotMoveError::InvalidResumeOffset { .. }
            | PlotMoveError::FinalizeFailed { .. } => ErrorSeverity::High,
            PlotMoveError::ClaimFailed { .. }
            | PlotMoveError::CrossDevice { .. }
            | PlotMoveError::InsufficientSpace { .. }
            | PlotMoveError::InvalidConfiguration { .. }
            | PlotMoveError::Config(_) => ErrorSeverity::Medium,
            PlotMoveError::NotAPlot { .. } | PlotMoveError::MonitoringError { .. } => {
                ErrorSeverity::Low
            }
            _ => ErrorSeverity::Medium,
        }
    }

    /// Get suggested user action
    pub fn suggested_action(&self) -> &'static str {
        match self {
            PlotMoveError::NoSourceDirectory { .. } => "Check the configured source directories",
            PlotMoveError::DestinationUnavailable { .. } => {
                "Check that the destination is mounted and writable"
            }
            PlotMoveError::CrossDevice { .. } => {
                "Use method 2 or 3 to move plots between different volumes"
            }
            PlotMoveError::InsufficientSpace { .. } => "Free up disk space on the destination",
            PlotMoveError::SizeMismatch { .. } => {
                "Inspect both files; the source was kept and the move resumes on the next scan"
            }
            _ => "Check the error details and consult the logs",
        }
    }

    /// Convert to exit code for the binary
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Critical => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 1,
            ErrorSeverity::Low => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Result type alias for plotmove operations
pub type PlotMoveResult<T> = Result<T, PlotMoveError>;

/// Attaches the offending path to a bare `io::Error`.
pub trait IoResultExt<T> {
    fn at_path(self, path: &Path) -> PlotMoveResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> PlotMoveResult<T> {
        self.map_err(|source| PlotMoveError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
    }
}
