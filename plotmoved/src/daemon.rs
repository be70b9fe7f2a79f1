use crate::config::Config;
use crate::error::{PlotMoveError, PlotMoveResult};
use crate::metrics::Metrics;
use crate::mover::{PlotMover, TransferReport};
use crate::progress::{ProgressFactory, ProgressStyleKind};
use crate::scanner::{Candidate, Classification, DirectoryScanner};
use crate::utils::format_bytes;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::fs;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one pass over the source directories did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Transfers completed, resumed ones included.
    pub moved: usize,
    pub resumed: usize,
    pub failed: usize,
    pub bytes_moved: u64,
}

impl ScanSummary {
    pub fn is_idle(&self) -> bool {
        self.moved == 0 && self.failed == 0
    }
}

pub struct Daemon {
    config: Config,
    mover: PlotMover,
    metrics: Metrics,
}

impl Daemon {
    pub fn new(config: Config) -> PlotMoveResult<Self> {
        let progress = if config.progress_bar {
            ProgressStyleKind::Bar
        } else {
            ProgressStyleKind::Log
        };
        Self::with_progress(config, Arc::new(progress))
    }

    pub fn with_progress(
        config: Config,
        progress: Arc<dyn ProgressFactory>,
    ) -> PlotMoveResult<Self> {
        let mover = PlotMover::new(config.destination.clone(), config.engine_options(), progress);
        let metrics = Metrics::new()?;

        Ok(Self {
            config,
            mover,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Fails unless at least one source directory exists; creates the
    /// destination directory when it is missing.
    pub async fn check_environment(&self) -> PlotMoveResult<()> {
        let mut any_source = false;
        for source in &self.config.sources {
            match fs::metadata(source).await {
                Ok(metadata) if metadata.is_dir() => any_source = true,
                _ => debug!("Source directory {:?} is not available", source),
            }
        }
        if !any_source {
            return Err(PlotMoveError::NoSourceDirectory {
                paths: self.config.sources.clone(),
            });
        }

        let destination = &self.config.destination;
        match fs::try_exists(destination).await {
            Ok(true) => {}
            Ok(false) => info!("Creating destination directory {:?}", destination),
            Err(e) => warn!("Could not check destination {:?}: {}", destination, e),
        }
        fs::create_dir_all(destination)
            .await
            .map_err(|source| PlotMoveError::DestinationUnavailable {
                path: destination.clone(),
                source,
            })
    }

    /// One pass over every candidate, in order, one at a time. Only
    /// environment errors are returned; a failed plot is logged, counted and
    /// left for the next pass.
    pub async fn scan_once(&self) -> PlotMoveResult<ScanSummary> {
        self.check_environment().await?;
        let mut summary = ScanSummary::default();

        for candidate in DirectoryScanner::list_candidates(&self.config.sources).await {
            if candidate.classification == Classification::Ignore {
                continue;
            }
            // An earlier transfer in this pass can take a while; the plotter or
            // an operator may have removed the file meanwhile.
            match fs::try_exists(&candidate.path).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{:?} disappeared before it could be moved", candidate.path);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {:?}, could not check it: {}", candidate.path, e);
                    continue;
                }
            }

            self.metrics.record_transfer_started();
            match self.handle_candidate(&candidate).await {
                Ok(report) => {
                    self.metrics.record_transfer_completed(&report);
                    summary.moved += 1;
                    if report.was_resumed() {
                        summary.resumed += 1;
                    }
                    summary.bytes_moved += report.bytes_moved;
                }
                Err(e) => {
                    self.metrics.record_transfer_failed(&e);
                    error!("Failed to move {:?}: {}", candidate.path, e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn handle_candidate(&self, candidate: &Candidate) -> PlotMoveResult<TransferReport> {
        match candidate.classification {
            Classification::FreshPlot => {
                self.mover
                    .move_plot(&candidate.path, self.config.method)
                    .await
            }
            Classification::ResumableMarked(_) => self.mover.continue_claimed(&candidate.path).await,
            Classification::Ignore => Err(PlotMoveError::NotAPlot {
                path: candidate.path.clone(),
            }),
        }
    }

    /// Scans every `scan_interval` until `shutdown` resolves or the
    /// environment check fails. Dropping an in-flight transfer on shutdown
    /// leaves its markers behind for the next start to resume.
    pub async fn run<F>(&self, shutdown: F) -> PlotMoveResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Watching {:?}, moving plots to {:?} with {}",
            self.config.sources, self.config.destination, self.config.method
        );

        if let Some(addr) = &self.config.metrics_bind_addr {
            let metrics = self.metrics.clone();
            let addr = addr.clone();
            tokio::spawn(async move {
                if let Err(e) = run_metrics_server(metrics, addr).await {
                    error!("Metrics server error: {}", e);
                }
            });
        }

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.scan_once() => match result {
                    Ok(summary) if summary.is_idle() => debug!("Nothing to move"),
                    Ok(summary) => info!(
                        "Scan finished: {} moved ({} resumed), {} failed, {}",
                        summary.moved,
                        summary.resumed,
                        summary.failed,
                        format_bytes(summary.bytes_moved)
                    ),
                    Err(e) => return Err(e),
                },
            }
        }

        info!("Shutdown requested, stopping");
        Ok(())
    }
}

async fn run_metrics_server(metrics: Metrics, addr: String) -> Result<()> {
    use hyper::{Body, Response, StatusCode};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    let make_svc = hyper::service::make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != "/metrics" {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("Not Found");
                        return Ok::<_, Infallible>(response);
                    }
                    match metrics.export() {
                        Ok(body) => *response.body_mut() = Body::from(body),
                        Err(e) => {
                            error!("Failed to export metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from("Internal Server Error");
                        }
                    }
                    Ok(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse()?;
    let server = hyper::Server::try_bind(&addr)?.serve(make_svc);

    info!("Metrics server listening on http://{}/metrics", addr);
    server.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn config(sources: Vec<PathBuf>, destination: &Path) -> Config {
        Config {
            sources,
            destination: destination.to_path_buf(),
            method: plotmove_protocol::TransferMethod::ChunkedCopy,
            ..Config::default()
        }
    }

    fn daemon(config: Config) -> Daemon {
        Daemon::with_progress(config, Arc::new(ProgressStyleKind::Silent)).unwrap()
    }

    #[tokio::test]
    async fn test_no_source_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(config(vec![dir.path().join("missing")], &dir.path().join("farm")));

        let err = daemon.scan_once().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, PlotMoveError::NoSourceDirectory { .. }));
    }

    #[tokio::test]
    async fn test_destination_is_created() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tmp");
        fs::create_dir(&source).await.unwrap();
        let destination = dir.path().join("farm").join("disk1");

        let summary = daemon(config(vec![source], &destination))
            .scan_once()
            .await
            .unwrap();

        assert!(summary.is_idle());
        assert!(destination.is_dir());
    }

    #[tokio::test]
    async fn test_destination_that_is_a_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tmp");
        fs::create_dir(&source).await.unwrap();
        let destination = dir.path().join("farm");
        fs::write(&destination, b"not a directory").await.unwrap();

        let err = daemon(config(vec![source], &destination))
            .scan_once()
            .await
            .unwrap_err();
        assert!(matches!(err, PlotMoveError::DestinationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_destination_below_a_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tmp");
        fs::create_dir(&source).await.unwrap();
        let blocker = dir.path().join("farm");
        fs::write(&blocker, b"not a directory").await.unwrap();

        // The existence check itself fails here (ENOTDIR), not just the create.
        assert!(fs::try_exists(blocker.join("disk1")).await.is_err());

        let err = daemon(config(vec![source], &blocker.join("disk1")))
            .scan_once()
            .await
            .unwrap_err();
        assert!(matches!(err, PlotMoveError::DestinationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_oversized_partial_restarts_within_pass() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tmp");
        let destination = dir.path().join("farm");
        fs::create_dir(&source).await.unwrap();
        fs::create_dir(&destination).await.unwrap();

        // Destination longer than the claimed source: renamed aside, restarted.
        fs::write(source.join("plot-a.plot.apcpm.move.m3"), vec![1u8; 10]).await.unwrap();
        fs::write(destination.join("plot-a.plot.apcpm.move.m3"), vec![0u8; 20])
            .await
            .unwrap();
        fs::write(source.join("plot-b.plot"), vec![2u8; 64]).await.unwrap();

        let daemon = daemon(config(vec![source.clone()], &destination));
        let summary = daemon.scan_once().await.unwrap();

        assert_eq!(summary.moved, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.bytes_moved, 74);
        assert_eq!(fs::read(destination.join("plot-a.plot")).await.unwrap(), vec![1u8; 10]);
        assert_eq!(fs::read(destination.join("plot-b.plot")).await.unwrap(), vec![2u8; 64]);
        assert_eq!(daemon.metrics().transfers_completed.get(), 2.0);
    }
}
