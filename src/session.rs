//! The owned telemetry session.
//!
//! A [`TelemetrySession`] ties one queue, one set of channel buffers and one
//! acquisition loop together. Every public operation of the pipeline hangs off it;
//! there is no global state, so several sessions (say, two devices) can run side by
//! side.
//!
//! ```no_run
//! use serial_telemetry::config::TelemetryConfig;
//! use serial_telemetry::session::TelemetrySession;
//! use serial_telemetry::transport::SerialPortFactory;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = TelemetrySession::new(TelemetryConfig::load()?, Arc::new(SerialPortFactory))?;
//! session.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! session.drain();
//! let points = session.query(0, Some(2_000))?;
//! println!("{} points", points.len());
//! session.stop();
//! # Ok(())
//! # }
//! ```

use crate::acquisition::{AcquisitionLoop, AcquisitionStats, LoggerState, StartOutcome, StopOutcome};
use crate::buffer::{ChannelBuffers, ChannelRingBuffer};
use crate::config::TelemetryConfig;
use crate::downsample::{self, Point};
use crate::error::AppResult;
use crate::export;
use crate::parser::Row;
use crate::queue::BoundedRowQueue;
use crate::transport::TransportFactory;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time view of a session, for status lines and the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Acquisition thread lifecycle state
    pub state: LoggerState,
    /// Thread alive and not asked to stop
    pub running: bool,
    /// Values per row
    pub channels: usize,
    /// Samples kept per channel
    pub buffer_length: usize,
    /// Rows waiting in the queue (approximate)
    pub queue_depth: usize,
    /// Queue capacity before the oldest rows are evicted
    pub queue_capacity: usize,
    /// Rows moved from the queue into the buffers over the session's lifetime
    pub rows_drained: u64,
    /// Counters from the acquisition thread
    pub acquisition: AcquisitionStats,
}

/// One device, one pipeline.
pub struct TelemetrySession {
    config: TelemetryConfig,
    queue: Arc<BoundedRowQueue>,
    buffers: ChannelBuffers,
    acquisition: AcquisitionLoop,
    rows_drained: AtomicU64,
}

impl TelemetrySession {
    /// Validate `config` and build an idle session reading through `factory`.
    pub fn new(config: TelemetryConfig, factory: Arc<dyn TransportFactory>) -> AppResult<Self> {
        config.validate()?;
        let queue = Arc::new(BoundedRowQueue::new(config.acquisition.queue_capacity));
        let buffers = ChannelBuffers::new(config.acquisition.channels, config.buffer.length);
        let acquisition = AcquisitionLoop::new(&config, factory, Arc::clone(&queue));
        Ok(Self {
            config,
            queue,
            buffers,
            acquisition,
            rows_drained: AtomicU64::new(0),
        })
    }

    /// Validated configuration the session was built with.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Values per row.
    pub fn channels(&self) -> usize {
        self.buffers.channel_count()
    }

    /// See [`AcquisitionLoop::start`].
    pub fn start(&self) -> AppResult<StartOutcome> {
        self.acquisition.start()
    }

    /// See [`AcquisitionLoop::stop`].
    pub fn stop(&self) -> StopOutcome {
        self.acquisition.stop()
    }

    /// Acquisition thread alive and not asked to stop.
    pub fn is_running(&self) -> bool {
        self.acquisition.is_running()
    }

    /// Acquisition lifecycle state.
    pub fn state(&self) -> LoggerState {
        self.acquisition.state()
    }

    /// Rows waiting in the queue. Approximate while acquisition runs.
    pub fn queue_depth(&self) -> usize {
        self.queue.approximate_size()
    }

    /// Move every queued row into the channel buffers. Returns rows processed.
    pub fn drain(&self) -> usize {
        let rows = self.buffers.drain(&self.queue);
        self.count_drained(rows);
        rows
    }

    /// Take one logical event (`samples_per_event` rows, or fewer if the queue is
    /// short) off the queue. The buffers are left alone; only [`drain`](Self::drain)
    /// writes them.
    pub fn read_event(&self) -> Vec<Row> {
        self.queue.drain_up_to(self.config.acquisition.samples_per_event)
    }

    /// Downsampled view of one channel.
    pub fn query(&self, channel: usize, max_points: Option<usize>) -> AppResult<Vec<Point>> {
        downsample::query(&self.buffers, channel, max_points)
    }

    /// Downsampled view of every channel.
    pub fn query_all(&self, max_points: Option<usize>) -> Vec<Vec<Point>> {
        downsample::query_all(&self.buffers, max_points)
    }

    /// Copy of one channel's full window.
    pub fn snapshot(&self, channel: usize) -> AppResult<ChannelRingBuffer> {
        self.buffers.snapshot(channel)
    }

    /// Newest value of every channel.
    pub fn latest(&self) -> Vec<f64> {
        self.buffers.latest()
    }

    /// Reset every channel to zeros. Queued rows are kept.
    pub fn clear(&self) {
        self.buffers.clear();
    }

    /// Per-channel files, see [`export::save`].
    pub fn export(&self, prefix: &str, extension: &str, directory: &Path) -> Vec<PathBuf> {
        export::save(&self.buffers, prefix, extension, directory)
    }

    /// Export with the configured prefix, extension and directory.
    pub fn export_default(&self) -> Vec<PathBuf> {
        let settings = &self.config.export;
        self.export(&settings.prefix, &settings.extension, &settings.directory)
    }

    /// CSV files, see [`export::save_csv`].
    #[cfg(feature = "storage_csv")]
    pub fn export_csv(&self, options: &export::CsvExportOptions) -> Vec<PathBuf> {
        export::save_csv(&self.buffers, options)
    }

    /// Status snapshot. Takes no lock that acquisition or `stop` holds.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state(),
            running: self.is_running(),
            channels: self.channels(),
            buffer_length: self.buffers.length(),
            queue_depth: self.queue_depth(),
            queue_capacity: self.queue.capacity(),
            rows_drained: self.rows_drained.load(Ordering::Relaxed),
            acquisition: self.acquisition.stats(),
        }
    }

    fn count_drained(&self, rows: usize) {
        self.rows_drained.fetch_add(rows as u64, Ordering::Relaxed);
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.acquisition.stop();
    }
}
