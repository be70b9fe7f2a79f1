//! Filesystem naming contract for plotmove.
//!
//! Everything another process needs to interpret the state of a watched
//! directory lives here: which entries are fresh plots, which carry a transfer
//! marker (and with which method), and how displaced files are renamed aside.

use anyhow::Result;
use chrono::{DateTime, Local};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every plot file name starts with this prefix.
pub const PLOT_PREFIX: &str = "plot";

/// Extension of a finished, unclaimed plot.
pub const PLOT_EXTENSION: &str = ".plot";

/// Marker suffix stem; the method code is appended to it.
pub const MARKER_STEM: &str = ".apcpm.move.m";

/// Stem of the suffix used when a file has to be renamed aside.
pub const TRASH_STEM: &str = ".trash";

/// `ddMMyyyyHHmmss`, second precision.
pub const TRASH_TIMESTAMP_FORMAT: &str = "%d%m%Y%H%M%S";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TransferMethod {
    /// Single `rename`; fails across devices.
    Rename = 1,
    /// `rename`, falling back to copy + delete across devices.
    FilesystemMove = 2,
    /// Resumable chunked copy, source deleted after size verification.
    ChunkedCopy = 3,
}

impl TransferMethod {
    pub const ALL: [TransferMethod; 3] = [
        TransferMethod::Rename,
        TransferMethod::FilesystemMove,
        TransferMethod::ChunkedCopy,
    ];

    pub fn code(self) -> u8 {
        self.into()
    }

    /// The marker suffix claiming a file for this method, e.g. `.apcpm.move.m3`.
    pub fn marker_suffix(self) -> String {
        format!("{}{}", MARKER_STEM, self.code())
    }

    /// Only the chunked copy can pick up where an interrupted run stopped.
    pub fn is_resumable(self) -> bool {
        matches!(self, TransferMethod::ChunkedCopy)
    }
}

impl Default for TransferMethod {
    fn default() -> Self {
        TransferMethod::Rename
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TransferMethod::Rename => "rename",
            TransferMethod::FilesystemMove => "filesystem-move",
            TransferMethod::ChunkedCopy => "chunked-copy",
        };
        write!(f, "{} (method {})", name, self.code())
    }
}

impl FromStr for TransferMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "rename" => Ok(TransferMethod::Rename),
            "2" | "move" | "filesystem-move" => Ok(TransferMethod::FilesystemMove),
            "3" | "chunked" | "chunked-copy" => Ok(TransferMethod::ChunkedCopy),
            _ => Err(anyhow::anyhow!(
                "Invalid transfer method: {} (expected 1, 2 or 3)",
                s
            )),
        }
    }
}

/// What a directory entry means to the mover, judged by its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    FreshPlot,
    Marked(TransferMethod),
    Ignore,
}

pub fn classify_name(name: &str) -> EntryKind {
    if !name.starts_with(PLOT_PREFIX) {
        return EntryKind::Ignore;
    }
    if name.ends_with(PLOT_EXTENSION) {
        return EntryKind::FreshPlot;
    }
    match split_marker(name) {
        Some((_, method)) => EntryKind::Marked(method),
        None => EntryKind::Ignore,
    }
}

pub fn marker_name(original: &str, method: TransferMethod) -> String {
    format!("{}{}", original, method.marker_suffix())
}

/// Splits `name` into its original name and the method of its marker suffix.
///
/// Returns `None` for names without a recognised marker, and for a bare marker
/// with nothing in front of it.
pub fn split_marker(name: &str) -> Option<(&str, TransferMethod)> {
    TransferMethod::ALL.iter().find_map(|method| {
        let suffix = method.marker_suffix();
        name.strip_suffix(suffix.as_str())
            .filter(|original| !original.is_empty())
            .map(|original| (original, *method))
    })
}

pub fn trash_name(name: &str, at: DateTime<Local>) -> String {
    format!("{}{}{}", name, TRASH_STEM, at.format(TRASH_TIMESTAMP_FORMAT))
}
