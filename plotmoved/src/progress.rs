//! Coarse percentage progress for the chunked copy.
//!
//! The copy loop feeds cumulative destination sizes into a [`ProgressState`],
//! which decides when a new percentage is worth reporting; the resulting
//! percentages go to a [`ProgressSink`].

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Number of reporting steps over the whole file.
pub const PROGRESS_PARTS: u64 = 100;

/// Receives the percentages reported by the copy loop.
pub trait ProgressSink: Send {
    fn report(&mut self, percent: u8);

    fn finish(&mut self) {}
}

/// Threshold bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct ProgressState {
    total_size: u64,
    part_size: u64,
    next_threshold: u64,
    last_percent: Option<u8>,
}

impl ProgressState {
    /// `current_size` is what the destination already holds (the resume offset).
    pub fn new(total_size: u64, current_size: u64) -> Self {
        let part_size = total_size / PROGRESS_PARTS;
        let next_threshold = if total_size == 0 {
            0
        } else {
            let parts_done = (current_size as u128 * PROGRESS_PARTS as u128)
                .div_ceil(total_size as u128) as u64;
            parts_done * part_size
        };

        Self {
            total_size,
            part_size,
            next_threshold,
            last_percent: None,
        }
    }

    pub fn next_threshold(&self) -> u64 {
        self.next_threshold
    }

    /// Records the new cumulative size; returns a percentage when a threshold
    /// was crossed and that percentage has not been reported yet.
    pub fn advance(&mut self, bytes_written: u64) -> Option<u8> {
        if self.total_size == 0 || bytes_written < self.next_threshold {
            return None;
        }
        self.next_threshold += self.part_size;
        self.emit(percent_of(bytes_written, self.total_size))
    }

    /// Returns 100 unless it was already reported.
    pub fn complete(&mut self) -> Option<u8> {
        self.emit(100)
    }

    fn emit(&mut self, percent: u8) -> Option<u8> {
        match self.last_percent {
            Some(last) if percent <= last => None,
            _ => {
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }
}

/// Rounded percentage, never above 100.
pub fn percent_of(part: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let rounded = (part as u128 * 100 + total as u128 / 2) / total as u128;
    rounded.min(100) as u8
}

/// Reports each percentage as a log line.
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressSink for LogProgress {
    fn report(&mut self, percent: u8) {
        info!("Progress {}: {:03}%", self.name, percent);
    }
}

/// Terminal progress bar, one position per percent.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(PROGRESS_PARTS);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(name.to_string());
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn report(&mut self, percent: u8) {
        self.bar.set_position(percent as u64);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

/// Discards every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u8) {}
}

/// Builds a sink for each transfer; lets the daemon pick log lines or a bar.
pub trait ProgressFactory: Send + Sync {
    fn create(&self, name: &str) -> Box<dyn ProgressSink>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyleKind {
    Log,
    Bar,
    Silent,
}

impl ProgressFactory for ProgressStyleKind {
    fn create(&self, name: &str) -> Box<dyn ProgressSink> {
        match self {
            ProgressStyleKind::Log => Box::new(LogProgress::new(name)),
            ProgressStyleKind::Bar => Box::new(BarProgress::new(name)),
            ProgressStyleKind::Silent => Box::new(NoProgress),
        }
    }
}
