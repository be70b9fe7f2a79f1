use crate::error::{PlotMoveError, PlotMoveResult};
use crate::mover::TransferReport;
use crate::utils::throughput_mbps;
use prometheus::{Counter, Encoder, Gauge, Histogram, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub transfers_total: Counter,
    pub transfers_active: Gauge,
    pub transfers_completed: Counter,
    pub transfers_failed: Counter,
    pub transfers_resumed: Counter,
    pub size_mismatches: Counter,
    pub bytes_moved_total: Counter,
    pub transfer_duration: Histogram,
    pub throughput_mbps: Gauge,
}

impl Metrics {
    pub fn new() -> PlotMoveResult<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total = Counter::new("plotmove_transfers_total", "Transfers started")?;
        let transfers_active = Gauge::new("plotmove_transfers_active", "Transfers in progress")?;
        let transfers_completed =
            Counter::new("plotmove_transfers_completed_total", "Plots moved and finalized")?;
        let transfers_failed =
            Counter::new("plotmove_transfers_failed_total", "Transfers that ended in an error")?;
        let transfers_resumed = Counter::new(
            "plotmove_transfers_resumed_total",
            "Chunked copies resumed from a partial destination",
        )?;
        let size_mismatches = Counter::new(
            "plotmove_size_mismatches_total",
            "Transfers whose destination size did not match the source",
        )?;
        let bytes_moved_total = Counter::new("plotmove_bytes_moved_total", "Total bytes moved")?;
        let transfer_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "plotmove_transfer_duration_seconds",
                "Time taken to move one plot",
            )
            .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0]),
        )?;
        let throughput_mbps =
            Gauge::new("plotmove_throughput_mbps", "Throughput of the last transfer in MB/s")?;

        registry.register(Box::new(transfers_total.clone()))?;
        registry.register(Box::new(transfers_active.clone()))?;
        registry.register(Box::new(transfers_completed.clone()))?;
        registry.register(Box::new(transfers_failed.clone()))?;
        registry.register(Box::new(transfers_resumed.clone()))?;
        registry.register(Box::new(size_mismatches.clone()))?;
        registry.register(Box::new(bytes_moved_total.clone()))?;
        registry.register(Box::new(transfer_duration.clone()))?;
        registry.register(Box::new(throughput_mbps.clone()))?;

        Ok(Self {
            registry,
            transfers_total,
            transfers_active,
            transfers_completed,
            transfers_failed,
            transfers_resumed,
            size_mismatches,
            bytes_moved_total,
            transfer_duration,
            throughput_mbps,
        })
    }

    pub fn export(&self) -> PlotMoveResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| PlotMoveError::MonitoringError {
            reason: e.to_string(),
        })
    }

    pub fn record_transfer_started(&self) {
        self.transfers_total.inc();
        self.transfers_active.inc();
    }

    pub fn record_transfer_completed(&self, report: &TransferReport) {
        self.transfers_completed.inc();
        self.transfers_active.dec();
        if report.was_resumed() {
            self.transfers_resumed.inc();
        }
        self.bytes_moved_total.inc_by(report.bytes_moved as f64);
        self.transfer_duration.observe(report.elapsed.as_secs_f64());
        if !report.elapsed.is_zero() {
            self.throughput_mbps
                .set(throughput_mbps(report.bytes_moved, report.elapsed));
        }
    }

    pub fn record_transfer_failed(&self, error: &PlotMoveError) {
        self.transfers_failed.inc();
        self.transfers_active.dec();
        if matches!(error, PlotMoveError::SizeMismatch { .. }) {
            self.size_mismatches.inc();
        }
    }
}
