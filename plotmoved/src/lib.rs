pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod mover;
pub mod progress;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use daemon::{Daemon, ScanSummary};
pub use engine::{transfer, EngineOptions, TransferOutcome, TransferTask, DEFAULT_CHUNK_SIZE};
pub use error::{ErrorSeverity, PlotMoveError, PlotMoveResult};
pub use metrics::Metrics;
pub use mover::{PlotMover, TransferReport};
pub use progress::{ProgressFactory, ProgressSink, ProgressStyleKind};
pub use scanner::{Candidate, Classification, DirectoryScanner};

// Expose the protocol crate directly for convenience (e.g., plotmoved::protocol::TransferMethod)
pub use plotmove_protocol as protocol;
pub use plotmove_protocol::TransferMethod;
