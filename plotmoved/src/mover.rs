//! Claim / transfer / finalize protocol around the engine.
//!
//! A plot is claimed by renaming it in place with the marker suffix of the
//! method moving it. The destination carries the same marker name until the
//! engine succeeds, and the final rename is the only point at which the plot
//! appears under its real name. Anything already using a name we need is
//! renamed aside, never overwritten.

use crate::engine::{self, EngineOptions, TransferTask};
use crate::error::{IoResultExt, PlotMoveError, PlotMoveResult};
use crate::progress::ProgressFactory;
use crate::utils::{format_bytes, remaining_percent};
use chrono::Local;
use plotmove_protocol::{marker_name, split_marker, trash_name, TransferMethod};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub task_id: Uuid,
    pub name: String,
    pub final_path: PathBuf,
    pub method: TransferMethod,
    pub bytes_moved: u64,
    pub total_size: u64,
    pub resumed_from: u64,
    pub elapsed: Duration,
    /// Files renamed aside to make room, with their new paths.
    pub displaced: Vec<PathBuf>,
}

impl TransferReport {
    pub fn was_resumed(&self) -> bool {
        self.resumed_from > 0
    }
}

pub struct PlotMover {
    destination_dir: PathBuf,
    options: EngineOptions,
    progress: Arc<dyn ProgressFactory>,
}

impl PlotMover {
    pub fn new(
        destination_dir: impl Into<PathBuf>,
        options: EngineOptions,
        progress: Arc<dyn ProgressFactory>,
    ) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            options,
            progress,
        }
    }

    /// Claims an unclaimed plot and moves it with `method`.
    pub async fn move_plot(
        &self,
        source: &Path,
        method: TransferMethod,
    ) -> PlotMoveResult<TransferReport> {
        let name = file_name(source)?.to_string();
        let size = fs::metadata(source).await.at_path(source)?.len();
        info!(
            "Detected plot '{}' in {:?} with size {} bytes",
            name,
            source.parent().unwrap_or(source),
            size
        );

        let claimed = claim(source, method).await?;
        let dest_marker = self.destination_dir.join(marker_name(&name, method));

        let mut displaced = Vec::new();
        if fs::try_exists(&dest_marker).await.at_path(&dest_marker)? {
            displaced.push(rename_aside(&dest_marker).await?);
        }

        let task = TransferTask::new(&claimed, &dest_marker, method, &self.options).await?;
        self.run(task, name, displaced).await
    }

    /// Picks up a source that already carries a marker suffix.
    ///
    /// A chunked copy whose destination marker exists resumes at the
    /// destination's size. Without a destination the claim never got as far as
    /// writing, so the transfer restarts at offset 0. Other methods are not
    /// resumable and start over.
    pub async fn continue_claimed(&self, marked_source: &Path) -> PlotMoveResult<TransferReport> {
        let marked_name = file_name(marked_source)?;
        let (original, method) =
            split_marker(marked_name).ok_or_else(|| PlotMoveError::NotAPlot {
                path: marked_source.to_path_buf(),
            })?;
        let original = original.to_string();
        let dest_marker = self.destination_dir.join(marked_name);

        let task = TransferTask::new(marked_source, &dest_marker, method, &self.options).await?;
        let mut displaced = Vec::new();

        let task = match existing_len(&dest_marker).await? {
            None => {
                info!(
                    "Plot '{}' was claimed but never started; restarting from offset 0",
                    original
                );
                task
            }
            Some(dest_size) if method.is_resumable() && dest_size <= task.total_size => {
                let remaining = task.total_size - dest_size;
                info!(
                    "Detected incomplete moved plot '{}' with size {} bytes; destination has {} bytes, {} bytes remaining ({}%)",
                    marked_name,
                    task.total_size,
                    dest_size,
                    remaining,
                    remaining_percent(remaining, task.total_size)
                );
                task.resume_from(dest_size)?
            }
            Some(dest_size) => {
                warn!(
                    "Destination {:?} ({} bytes) cannot be resumed with {}; restarting",
                    dest_marker, dest_size, method
                );
                displaced.push(rename_aside(&dest_marker).await?);
                task
            }
        };

        self.run(task, original, displaced).await
    }

    async fn run(
        &self,
        task: TransferTask,
        name: String,
        mut displaced: Vec<PathBuf>,
    ) -> PlotMoveResult<TransferReport> {
        let span = info_span!("transfer", task = %task.id, plot = %name);

        async move {
            let mut progress = self.progress.create(&name);
            let outcome = engine::transfer(&task, progress.as_mut()).await?;

            let (final_path, aside) = finalize(&task.destination, &name).await?;
            displaced.extend(aside);

            info!(
                "100% plot moved: {} ({} bytes) in {} ms",
                format_bytes(task.total_size),
                task.total_size,
                outcome.elapsed.as_millis()
            );

            Ok::<_, PlotMoveError>(TransferReport {
                task_id: task.id,
                name,
                final_path,
                method: task.method,
                bytes_moved: outcome.bytes_moved,
                total_size: task.total_size,
                resumed_from: task.resume_offset,
                elapsed: outcome.elapsed,
                displaced,
            })
        }
        .instrument(span)
        .await
    }
}

/// Renames `source` in place to carry the marker suffix of `method`.
pub async fn claim(source: &Path, method: TransferMethod) -> PlotMoveResult<PathBuf> {
    let name = file_name(source)?;
    let claimed = source.with_file_name(marker_name(name, method));
    info!("Claiming plot: adding suffix '{}'", method.marker_suffix());

    fs::rename(source, &claimed)
        .await
        .map_err(|source_err| PlotMoveError::ClaimFailed {
            path: source.to_path_buf(),
            source: source_err,
        })?;
    Ok(claimed)
}

/// Renames the marker-named destination to `original_name` in the same
/// directory. A file already holding that name is renamed aside first; its new
/// path is returned alongside the final path.
pub async fn finalize(
    dest_marker: &Path,
    original_name: &str,
) -> PlotMoveResult<(PathBuf, Option<PathBuf>)> {
    let final_path = dest_marker.with_file_name(original_name);

    let displaced = if fs::try_exists(&final_path).await.at_path(&final_path)? {
        Some(rename_aside(&final_path).await?)
    } else {
        None
    };

    info!("Finalizing: removing marker from {:?}", dest_marker);
    fs::rename(dest_marker, &final_path)
        .await
        .map_err(|source| PlotMoveError::FinalizeFailed {
            path: dest_marker.to_path_buf(),
            source,
        })?;

    Ok((final_path, displaced))
}

/// Moves `path` out of the way under a timestamped trash name and returns the
/// new path. A counter is appended if that name is taken as well.
pub async fn rename_aside(path: &Path) -> PlotMoveResult<PathBuf> {
    let name = file_name(path)?;
    let base = trash_name(name, Local::now());

    let mut candidate = path.with_file_name(&base);
    let mut counter = 1;
    while fs::try_exists(&candidate).await.at_path(&candidate)? {
        candidate = path.with_file_name(format!("{}-{}", base, counter));
        counter += 1;
    }

    warn!("{:?} already exists, renaming it to {:?}", path, candidate);
    fs::rename(path, &candidate).await.at_path(path)?;
    Ok(candidate)
}

async fn existing_len(path: &Path) -> PlotMoveResult<Option<u64>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).at_path(path),
    }
}

fn file_name(path: &Path) -> PlotMoveResult<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PlotMoveError::NotAPlot {
            path: path.to_path_buf(),
        })
}
