use crate::error::{IoResultExt, PlotMoveResult};
use plotmove_protocol::{classify_name, EntryKind, TransferMethod};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// An unclaimed `.plot` file.
    FreshPlot,
    /// Carries a marker suffix: interrupted, or claimed and never started.
    ResumableMarked(TransferMethod),
    /// Not ours; some other process may be using it.
    Ignore,
}

impl From<EntryKind> for Classification {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::FreshPlot => Classification::FreshPlot,
            EntryKind::Marked(method) => Classification::ResumableMarked(method),
            EntryKind::Ignore => Classification::Ignore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub source_dir: PathBuf,
    pub classification: Classification,
}

pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Lists every regular file of the existing source directories with its
    /// classification, directories in the given order, entries by name.
    pub async fn list_candidates(source_dirs: &[PathBuf]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for source_dir in source_dirs {
            let names = match Self::file_names(source_dir).await {
                Ok(Some(names)) => names,
                Ok(None) => {
                    debug!("Skipping missing source directory {:?}", source_dir);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to list {:?}: {}", source_dir, e);
                    continue;
                }
            };

            candidates.extend(names.into_iter().map(|name| Candidate {
                classification: classify_name(&name).into(),
                path: source_dir.join(&name),
                source_dir: source_dir.clone(),
            }));
        }

        candidates
    }

    /// Sorted regular-file names of `dir`, or `None` if it does not exist.
    async fn file_names(dir: &Path) -> PlotMoveResult<Option<Vec<String>>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).at_path(dir),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.at_path(dir)? {
            let file_type = entry.file_type().await.at_path(&entry.path())?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!("Ignoring non UTF-8 file name {:?}", name),
            }
        }

        names.sort();
        Ok(Some(names))
    }
}
