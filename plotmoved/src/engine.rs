//! Byte-level transfer of one file.
//!
//! [`transfer`] is a pure function of its [`TransferTask`]: it keeps no state
//! between calls, and the only durable trace of an interrupted chunked copy is
//! the size of the destination file.

use crate::error::{IoResultExt, PlotMoveError, PlotMoveResult};
use crate::progress::{ProgressSink, ProgressState};
use crate::utils::{format_bytes, throughput_mbps};
use plotmove_protocol::TransferMethod;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub chunk_size: usize,
    /// Pause after every chunk write; zero means unthrottled.
    pub chunk_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Uuid,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Read once when the task is created; the claimed source is immutable.
    pub total_size: u64,
    pub method: TransferMethod,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Bytes already present at the destination; 0 for a fresh transfer.
    pub resume_offset: u64,
}

impl TransferTask {
    pub async fn new(
        source: &Path,
        destination: &Path,
        method: TransferMethod,
        options: &EngineOptions,
    ) -> PlotMoveResult<Self> {
        let metadata = fs::metadata(source).await.at_path(source)?;

        Ok(Self {
            id: Uuid::new_v4(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            total_size: metadata.len(),
            method,
            chunk_size: options.chunk_size.max(1),
            chunk_delay: options.chunk_delay,
            resume_offset: 0,
        })
    }

    pub fn resume_from(mut self, offset: u64) -> PlotMoveResult<Self> {
        if offset > self.total_size {
            return Err(PlotMoveError::InvalidResumeOffset {
                path: self.destination,
                offset,
                total_size: self.total_size,
            });
        }
        self.resume_offset = offset;
        Ok(self)
    }

    pub fn is_resume(&self) -> bool {
        self.resume_offset > 0
    }

    pub fn remaining(&self) -> u64 {
        self.total_size - self.resume_offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes moved by this invocation (excludes what a resume skipped).
    pub bytes_moved: u64,
    pub elapsed: Duration,
}

/// Moves `task.source` to `task.destination` with the task's method.
///
/// The destination must not hold an unrelated file: callers rename stale
/// entries aside before starting a fresh transfer.
pub async fn transfer(
    task: &TransferTask,
    progress: &mut dyn ProgressSink,
) -> PlotMoveResult<TransferOutcome> {
    if task.resume_offset > task.total_size {
        return Err(PlotMoveError::InvalidResumeOffset {
            path: task.destination.clone(),
            offset: task.resume_offset,
            total_size: task.total_size,
        });
    }

    info!(
        "Moving {:?} to {:?} with {} ({})",
        task.source,
        task.destination,
        task.method,
        format_bytes(task.total_size)
    );

    let start = Instant::now();
    let bytes_moved = match task.method {
        TransferMethod::Rename => rename_move(task, progress).await?,
        TransferMethod::FilesystemMove => filesystem_move(task, progress).await?,
        TransferMethod::ChunkedCopy => chunked_copy(task, progress).await?,
    };
    let elapsed = start.elapsed();

    info!(
        "Moved {} in {} ms ({:.2} MB/s)",
        format_bytes(bytes_moved),
        elapsed.as_millis(),
        throughput_mbps(bytes_moved, elapsed)
    );

    Ok(TransferOutcome {
        bytes_moved,
        elapsed,
    })
}

async fn rename_move(task: &TransferTask, progress: &mut dyn ProgressSink) -> PlotMoveResult<u64> {
    match fs::rename(&task.source, &task.destination).await {
        Ok(()) => {
            progress.report(100);
            progress.finish();
            Ok(task.total_size)
        }
        Err(e) if is_cross_device(&e) => Err(PlotMoveError::CrossDevice {
            source_path: task.source.clone(),
            destination: task.destination.clone(),
        }),
        Err(e) => Err(e).at_path(&task.source),
    }
}

async fn filesystem_move(
    task: &TransferTask,
    progress: &mut dyn ProgressSink,
) -> PlotMoveResult<u64> {
    match fs::rename(&task.source, &task.destination).await {
        Ok(()) => {
            progress.report(100);
            progress.finish();
            return Ok(task.total_size);
        }
        Err(e) if is_cross_device(&e) => {
            info!("Different volumes, falling back to copy and delete");
        }
        Err(e) => return Err(e).at_path(&task.source),
    }

    ensure_free_space(&task.destination, task.total_size)?;

    let copied = fs::copy(&task.source, &task.destination)
        .await
        .at_path(&task.destination)?;
    debug!("Copied {} bytes across volumes", copied);

    let dest_file = fs::File::open(&task.destination)
        .await
        .at_path(&task.destination)?;
    dest_file.sync_all().await.at_path(&task.destination)?;
    drop(dest_file);

    verify_size(&task.destination, task.total_size).await?;
    fs::remove_file(&task.source).await.at_path(&task.source)?;

    progress.report(100);
    progress.finish();
    Ok(copied)
}

async fn chunked_copy(task: &TransferTask, progress: &mut dyn ProgressSink) -> PlotMoveResult<u64> {
    ensure_free_space(&task.destination, task.remaining())?;

    let mut source = fs::File::open(&task.source).await.at_path(&task.source)?;
    let mut dest = fs::OpenOptions::new()
        .write(true)
        .create(!task.is_resume())
        .truncate(!task.is_resume())
        .open(&task.destination)
        .await
        .at_path(&task.destination)?;

    if task.is_resume() {
        // Seeking past the end would leave a hole that passes the size check.
        let existing = dest.metadata().await.at_path(&task.destination)?.len();
        if existing < task.resume_offset {
            return Err(PlotMoveError::SizeMismatch {
                path: task.destination.clone(),
                expected: task.resume_offset,
                actual: existing,
            });
        }
        info!("Resuming at offset {}", task.resume_offset);
        source
            .seek(SeekFrom::Start(task.resume_offset))
            .await
            .at_path(&task.source)?;
        dest.seek(SeekFrom::Start(task.resume_offset))
            .await
            .at_path(&task.destination)?;
    }

    let mut state = ProgressState::new(task.total_size, task.resume_offset);
    let mut buffer = vec![0u8; task.chunk_size.max(1)];
    let mut position = task.resume_offset;

    loop {
        let bytes_read = source.read(&mut buffer).await.at_path(&task.source)?;
        if bytes_read == 0 {
            break;
        }

        dest.write_all(&buffer[..bytes_read])
            .await
            .at_path(&task.destination)?;
        position += bytes_read as u64;

        if let Some(percent) = state.advance(position) {
            progress.report(percent);
        }

        if !task.chunk_delay.is_zero() {
            tokio::time::sleep(task.chunk_delay).await;
        }
    }

    dest.flush().await.at_path(&task.destination)?;
    dest.sync_all().await.at_path(&task.destination)?;
    drop(dest);
    drop(source);

    // Deleting the source is only allowed once the destination is complete.
    verify_size(&task.destination, task.total_size).await?;

    if let Some(percent) = state.complete() {
        progress.report(percent);
    }
    progress.finish();

    fs::remove_file(&task.source).await.at_path(&task.source)?;
    debug!("Removed source {:?}", task.source);

    Ok(position - task.resume_offset)
}

/// Fails with `SizeMismatch` unless `path` holds exactly `expected` bytes.
pub async fn verify_size(path: &Path, expected: u64) -> PlotMoveResult<()> {
    let actual = fs::metadata(path).await.at_path(path)?.len();
    if actual != expected {
        warn!(
            "Size verification failed for {:?}: expected {} bytes, found {} bytes; keeping source",
            path, expected, actual
        );
        return Err(PlotMoveError::SizeMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    debug!("Size verification passed: {} bytes", actual);
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(windows)]
fn is_cross_device(error: &std::io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    error.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_error: &std::io::Error) -> bool {
    false
}

#[cfg(unix)]
fn ensure_free_space(destination: &Path, required: u64) -> PlotMoveResult<()> {
    let volume = destination.parent().unwrap_or(destination);
    match nix::sys::statvfs::statvfs(volume) {
        Ok(stat) => {
            let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;
            if available < required {
                return Err(PlotMoveError::InsufficientSpace {
                    required,
                    available,
                });
            }
            Ok(())
        }
        Err(e) => {
            warn!("Could not query free space on {:?}: {}", volume, e);
            Ok(())
        }
    }
}

#[cfg(not(unix))]
fn ensure_free_space(_destination: &Path, _required: u64) -> PlotMoveResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    struct Recorder(Vec<u8>);

    impl ProgressSink for Recorder {
        fn report(&mut self, percent: u8) {
            self.0.push(percent);
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    async fn chunked_task(source: &Path, destination: &Path, chunk_size: usize) -> TransferTask {
        let options = EngineOptions {
            chunk_size,
            chunk_delay: Duration::ZERO,
        };
        TransferTask::new(source, destination, TransferMethod::ChunkedCopy, &options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_chunked_copy_fresh() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-a.plot");
        let destination = dir.path().join("out.plot");
        let data = pattern(10_000);
        fs::write(&source, &data).await.unwrap();

        let task = chunked_task(&source, &destination, 333).await;
        let mut recorder = Recorder(Vec::new());
        let outcome = transfer(&task, &mut recorder).await.unwrap();

        assert_eq!(outcome.bytes_moved, 10_000);
        assert_eq!(fs::read(&destination).await.unwrap(), data);
        assert!(!source.exists());
        assert_eq!(recorder.0.last(), Some(&100));
        assert!(recorder.0.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_chunked_copy_resume() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-b.plot");
        let destination = dir.path().join("out.plot");
        let data = pattern(5_000);
        fs::write(&source, &data).await.unwrap();
        fs::write(&destination, &data[..1_234]).await.unwrap();

        let task = chunked_task(&source, &destination, 512)
            .await
            .resume_from(1_234)
            .unwrap();
        let outcome = transfer(&task, &mut NoProgress).await.unwrap();

        assert_eq!(outcome.bytes_moved, 5_000 - 1_234);
        assert_eq!(fs::read(&destination).await.unwrap(), data);
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_resume_offset_beyond_total_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-c.plot");
        fs::write(&source, b"short").await.unwrap();

        let task = chunked_task(&source, &dir.path().join("out"), 4).await;
        let result = task.resume_from(6);
        assert!(matches!(
            result,
            Err(PlotMoveError::InvalidResumeOffset { offset: 6, total_size: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_source_keeps_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-d.plot");
        let destination = dir.path().join("out.plot");
        let data = pattern(2_000);
        fs::write(&source, &data).await.unwrap();

        let mut task = chunked_task(&source, &destination, 256).await;
        task.total_size = 3_000;

        let result = transfer(&task, &mut NoProgress).await;
        assert!(matches!(
            result,
            Err(PlotMoveError::SizeMismatch { expected: 3_000, actual: 2_000, .. })
        ));
        assert_eq!(fs::read(&source).await.unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_delay_paces_each_chunk() {
        let dir = TempDir::new().unwrap();
        let data = pattern(500);

        let source = dir.path().join("plot-slow.plot");
        fs::write(&source, &data).await.unwrap();
        let options = EngineOptions {
            chunk_size: 100,
            chunk_delay: Duration::from_millis(250),
        };
        let task = TransferTask::new(
            &source,
            &dir.path().join("slow.out"),
            TransferMethod::ChunkedCopy,
            &options,
        )
        .await
        .unwrap();

        let start = tokio::time::Instant::now();
        transfer(&task, &mut NoProgress).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5 * 250));

        let source = dir.path().join("plot-fast.plot");
        fs::write(&source, &data).await.unwrap();
        let task = chunked_task(&source, &dir.path().join("fast.out"), 100).await;

        let start = tokio::time::Instant::now();
        transfer(&task, &mut NoProgress).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_read_error_aborts_copy() {
        let dir = TempDir::new().unwrap();
        // Opening a directory succeeds, reading from it fails.
        let source = dir.path().join("plot-dir.plot");
        fs::create_dir(&source).await.unwrap();
        let destination = dir.path().join("out.plot");

        let task = chunked_task(&source, &destination, 64).await;
        let result = transfer(&task, &mut NoProgress).await;

        assert!(matches!(result, Err(PlotMoveError::Filesystem { .. })));
        assert!(source.is_dir());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_error_keeps_source() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-full.plot");
        let data = pattern(10_000);
        fs::write(&source, &data).await.unwrap();

        let task = chunked_task(&source, full, 1_000).await;
        let mut recorder = Recorder(Vec::new());
        let result = transfer(&task, &mut recorder).await;

        assert!(result.is_err());
        assert!(!recorder.0.contains(&100));
        assert_eq!(fs::read(&source).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_rename_method() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-e.plot");
        let destination = dir.path().join("moved.plot");
        fs::write(&source, b"plot bytes").await.unwrap();

        let task = TransferTask::new(
            &source,
            &destination,
            TransferMethod::Rename,
            &EngineOptions::default(),
        )
        .await
        .unwrap();
        let outcome = transfer(&task, &mut NoProgress).await.unwrap();

        assert_eq!(outcome.bytes_moved, 10);
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).await.unwrap(), b"plot bytes");
    }

    #[tokio::test]
    async fn test_filesystem_move_method() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plot-f.plot");
        let destination = dir.path().join("moved.plot");
        fs::write(&source, b"more plot bytes").await.unwrap();

        let task = TransferTask::new(
            &source,
            &destination,
            TransferMethod::FilesystemMove,
            &EngineOptions::default(),
        )
        .await
        .unwrap();
        transfer(&task, &mut NoProgress).await.unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).await.unwrap(), b"more plot bytes");
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = TransferTask::new(
            &dir.path().join("plot-missing.plot"),
            &dir.path().join("out"),
            TransferMethod::ChunkedCopy,
            &EngineOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(PlotMoveError::Filesystem { .. })));
    }
}
