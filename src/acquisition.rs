//! Background acquisition loop.
//!
//! One dedicated OS thread per run owns the transport, reads frames, parses them and
//! pushes rows into the shared [`BoundedRowQueue`]. It is the queue's only producer.
//!
//! ```text
//! Idle ──start()──▶ Opening ──open ok──▶ Reading ──stop()──▶ Closing ──▶ Idle
//!                      │
//!                      └──open failed (logged)──────────────────────────▶ Idle
//! ```
//!
//! Cancellation is cooperative: [`AcquisitionLoop::stop`] raises a flag that the loop
//! checks between reads, so the thread exits at most one read timeout later. `stop`
//! waits for that up to the configured stop timeout and never kills the thread.
//!
//! Nothing that goes wrong inside the loop reaches the caller. Open failures end the
//! run, malformed frames are dropped, read errors are logged and the loop carries on.

use crate::config::{SerialSettings, TelemetryConfig};
use crate::error::{AppResult, TelemetryError};
use crate::parser::LineParser;
use crate::queue::BoundedRowQueue;
use crate::transport::TransportFactory;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Name given to the acquisition thread (visible in logs and debuggers).
pub const THREAD_NAME: &str = "telemetry-acquisition";

/// Lifecycle of the acquisition thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoggerState {
    /// No thread, or the thread has exited
    Idle = 0,
    /// Thread spawned, transport being opened
    Opening = 1,
    /// Transport open, frames flowing into the queue
    Reading = 2,
    /// Cancel observed, transport being released
    Closing = 3,
}

impl LoggerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoggerState::Opening,
            2 => LoggerState::Reading,
            3 => LoggerState::Closing,
            _ => LoggerState::Idle,
        }
    }
}

impl fmt::Display for LoggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoggerState::Idle => "idle",
            LoggerState::Opening => "opening",
            LoggerState::Reading => "reading",
            LoggerState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Result of [`AcquisitionLoop::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new thread was spawned
    Started,
    /// A previous thread is still alive; nothing was done
    AlreadyRunning,
}

/// Result of [`AcquisitionLoop::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The thread exited within the stop timeout
    Stopped,
    /// There was no live thread
    NotRunning,
    /// The thread was asked to stop but is still running
    TimedOut,
}

/// Counters published by the acquisition thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Frames returned by the transport
    pub lines_read: u64,
    /// Rows pushed into the queue
    pub rows_pushed: u64,
    /// Blank and `<no-data>` frames
    pub lines_skipped: u64,
    /// Malformed frames
    pub lines_rejected: u64,
    /// Transient read errors
    pub read_errors: u64,
    /// Queued rows evicted by overflow
    pub queue_evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_read: AtomicU64,
    rows_pushed: AtomicU64,
    lines_skipped: AtomicU64,
    lines_rejected: AtomicU64,
    read_errors: AtomicU64,
}

/// Owns the acquisition thread for one session.
pub struct AcquisitionLoop {
    settings: SerialSettings,
    channels: usize,
    stop_timeout: Duration,
    read_error_backoff: Duration,
    factory: Arc<dyn TransportFactory>,
    queue: Arc<BoundedRowQueue>,
    cancel: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionLoop {
    /// Idle loop that will read through `factory` into `queue` once started.
    pub fn new(
        config: &TelemetryConfig,
        factory: Arc<dyn TransportFactory>,
        queue: Arc<BoundedRowQueue>,
    ) -> Self {
        Self {
            settings: config.serial.clone(),
            channels: config.acquisition.channels,
            stop_timeout: config.acquisition.stop_timeout(),
            read_error_backoff: config.acquisition.read_error_backoff(),
            factory,
            queue,
            cancel: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(LoggerState::Idle as u8)),
            counters: Arc::new(Counters::default()),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the acquisition thread unless one is still alive.
    ///
    /// Returning `Started` only means the thread exists; whether the transport opened
    /// is visible through [`state`](Self::state) and the logs.
    pub fn start(&self) -> AppResult<StartOutcome> {
        let mut worker = self.worker.lock();
        if self.alive.load(Ordering::SeqCst) {
            debug!("Acquisition already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(finished) = worker.take() {
            reap(finished);
        }

        self.cancel.store(false, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
        self.state.store(LoggerState::Opening as u8, Ordering::SeqCst);

        let body = Worker {
            settings: self.settings.clone(),
            channels: self.channels,
            read_error_backoff: self.read_error_backoff,
            factory: Arc::clone(&self.factory),
            queue: Arc::clone(&self.queue),
            cancel: Arc::clone(&self.cancel),
            alive: Arc::clone(&self.alive),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        };

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || body.run())
            .map_err(|e| {
                self.alive.store(false, Ordering::SeqCst);
                self.state.store(LoggerState::Idle as u8, Ordering::SeqCst);
                TelemetryError::Thread(e.to_string())
            })?;
        *worker = Some(handle);

        info!(port = %self.settings.port, channels = self.channels, "Started acquisition");
        Ok(StartOutcome::Started)
    }

    /// Ask the thread to exit and wait for it, at most the stop timeout.
    ///
    /// The worker lock is only held to take the handle out and to put it back on
    /// timeout, so status queries from other threads never wait on this.
    pub fn stop(&self) -> StopOutcome {
        let Some(handle) = self.worker.lock().take() else {
            return StopOutcome::NotRunning;
        };
        // a stored handle with `Idle` published means the body already returned
        if !self.alive.load(Ordering::SeqCst) || self.state() == LoggerState::Idle {
            reap(handle);
            return StopOutcome::NotRunning;
        }

        self.cancel.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + self.stop_timeout;
        while self.alive.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Acquisition thread did not stop in time"
                );
                // `start` refuses while `alive` is set, so the slot is still empty
                *self.worker.lock() = Some(handle);
                return StopOutcome::TimedOut;
            }
            thread::sleep(Duration::from_millis(1));
        }
        reap(handle);

        let stats = self.stats();
        info!(
            lines = stats.lines_read,
            rows = stats.rows_pushed,
            rejected = stats.lines_rejected,
            read_errors = stats.read_errors,
            evicted = stats.queue_evictions,
            "Stopped acquisition"
        );
        StopOutcome::Stopped
    }

    /// Thread alive and not asked to stop. Never blocks.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.load(Ordering::SeqCst)
    }

    /// Current lifecycle state as published by the thread.
    pub fn state(&self) -> LoggerState {
        LoggerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Counters accumulated over every run of this loop.
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            lines_read: self.counters.lines_read.load(Ordering::Relaxed),
            rows_pushed: self.counters.rows_pushed.load(Ordering::Relaxed),
            lines_skipped: self.counters.lines_skipped.load(Ordering::Relaxed),
            lines_rejected: self.counters.lines_rejected.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            queue_evictions: self.queue.dropped(),
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.is_running() && self.stop() == StopOutcome::TimedOut {
            error!("Acquisition thread still running while its owner was dropped");
        }
    }
}

fn reap(handle: JoinHandle<()>) {
    if let Err(e) = handle.join() {
        error!("Acquisition thread panicked: {:?}", e);
    }
}

/// Everything the thread body needs, moved onto the thread.
struct Worker {
    settings: SerialSettings,
    channels: usize,
    read_error_backoff: Duration,
    factory: Arc<dyn TransportFactory>,
    queue: Arc<BoundedRowQueue>,
    cancel: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
}

/// Publishes `Idle` and clears liveness however the thread body exits, unwinding
/// included.
struct IdleOnExit {
    state: Arc<AtomicU8>,
    alive: Arc<AtomicBool>,
}

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.state.store(LoggerState::Idle as u8, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Worker {
    fn run(self) {
        let _idle = IdleOnExit {
            state: Arc::clone(&self.state),
            alive: Arc::clone(&self.alive),
        };

        let mut source = match self.factory.open(&self.settings) {
            Ok(source) => source,
            Err(e) => {
                error!(port = %self.settings.port, error = %e, "Failed to open transport");
                return;
            }
        };
        self.set_state(LoggerState::Reading);
        debug!(source = %source.describe(), "Reading frames");

        let mut parser = LineParser::new(self.channels);
        while !self.cancel.load(Ordering::SeqCst) {
            match source.read_frame() {
                Ok(Some(bytes)) => {
                    self.counters.lines_read.fetch_add(1, Ordering::Relaxed);
                    let line = String::from_utf8_lossy(&bytes);
                    let rejected_before = parser.stats().rejected;
                    if let Some(row) = parser.parse(&line) {
                        self.queue.push(row);
                        self.counters.rows_pushed.fetch_add(1, Ordering::Relaxed);
                    } else if parser.stats().rejected > rejected_before {
                        self.counters.lines_rejected.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.counters.lines_skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Transport read error");
                    if !self.read_error_backoff.is_zero() {
                        thread::sleep(self.read_error_backoff);
                    }
                }
            }
        }

        self.set_state(LoggerState::Closing);
        drop(source);
        debug!("Acquisition thread exiting");
    }

    fn set_state(&self, state: LoggerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptStep, ScriptedFactory};
    use std::io;

    fn config(channels: usize) -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.acquisition.channels = channels;
        config.serial.read_timeout_ms = 5;
        config.acquisition.read_error_backoff_ms = 1;
        config
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            LoggerState::Idle,
            LoggerState::Opening,
            LoggerState::Reading,
            LoggerState::Closing,
        ] {
            assert_eq!(LoggerState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn reads_parses_and_pushes() {
        let factory = Arc::new(ScriptedFactory::from_lines(["1,2", "<no-data>", "3,x", "4,5"]));
        let queue = Arc::new(BoundedRowQueue::new(16));
        let acq = AcquisitionLoop::new(&config(2), factory.clone(), queue.clone());

        assert_eq!(acq.start().unwrap(), StartOutcome::Started);
        assert!(wait_until(|| queue.approximate_size() == 2));
        assert!(wait_until(|| acq.state() == LoggerState::Reading));
        assert!(acq.is_running());

        assert_eq!(acq.stop(), StopOutcome::Stopped);
        assert_eq!(acq.state(), LoggerState::Idle);
        assert!(!acq.is_running());

        let rows: Vec<_> = queue.drain_all().into_iter().map(|r| r.into_values()).collect();
        assert_eq!(rows, vec![vec![1, 2], vec![4, 5]]);

        let stats = acq.stats();
        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.rows_pushed, 2);
        assert_eq!(stats.lines_skipped, 1);
        assert_eq!(stats.lines_rejected, 1);
        assert_eq!(factory.closed(), 1);
    }

    #[test]
    fn second_start_reports_already_running() {
        let factory = Arc::new(ScriptedFactory::default());
        let acq = AcquisitionLoop::new(&config(1), factory.clone(), Arc::default());

        assert_eq!(acq.start().unwrap(), StartOutcome::Started);
        assert_eq!(acq.start().unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(acq.stop(), StopOutcome::Stopped);
        assert_eq!(factory.opened(), 1);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let acq = AcquisitionLoop::new(&config(1), Arc::new(ScriptedFactory::default()), Arc::default());
        assert_eq!(acq.stop(), StopOutcome::NotRunning);
        assert_eq!(acq.state(), LoggerState::Idle);
    }

    #[test]
    fn open_failure_returns_to_idle() {
        let queue = Arc::new(BoundedRowQueue::new(4));
        let acq = AcquisitionLoop::new(&config(1), Arc::new(ScriptedFactory::failing()), queue.clone());

        assert_eq!(acq.start().unwrap(), StartOutcome::Started);
        assert!(wait_until(|| !acq.is_running() && acq.state() == LoggerState::Idle));
        assert_eq!(queue.approximate_size(), 0);
        assert_eq!(acq.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn read_errors_do_not_end_the_loop() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            ScriptStep::Error(io::ErrorKind::BrokenPipe),
            ScriptStep::Error(io::ErrorKind::Other),
            ScriptStep::Line("7".into()),
        ]));
        let queue = Arc::new(BoundedRowQueue::new(4));
        let acq = AcquisitionLoop::new(&config(1), factory, queue.clone());

        acq.start().unwrap();
        assert!(wait_until(|| queue.approximate_size() == 1));
        assert!(acq.is_running());
        assert_eq!(acq.stop(), StopOutcome::Stopped);
        assert_eq!(acq.stats().read_errors, 2);
    }

    #[test]
    fn restart_opens_a_fresh_transport() {
        let factory = Arc::new(ScriptedFactory::from_lines(["1"]));
        let queue = Arc::new(BoundedRowQueue::new(8));
        let acq = AcquisitionLoop::new(&config(1), factory.clone(), queue.clone());

        for _ in 0..3 {
            assert_eq!(acq.start().unwrap(), StartOutcome::Started);
            assert_eq!(acq.stop(), StopOutcome::Stopped);
        }
        assert_eq!(factory.opened(), 3);
        assert_eq!(factory.closed(), 3);
    }

    #[test]
    fn counters_accumulate_across_restarts() {
        let factory = Arc::new(ScriptedFactory::from_lines(["bad", "<no-data>", "1"]));
        let queue = Arc::new(BoundedRowQueue::new(8));
        let acq = AcquisitionLoop::new(&config(1), factory, queue.clone());

        for run in 1..=3u64 {
            acq.start().unwrap();
            assert!(wait_until(|| acq.stats().lines_read == 3 * run));
            assert_eq!(acq.stop(), StopOutcome::Stopped);
        }

        let stats = acq.stats();
        assert_eq!(stats.lines_read, 9);
        assert_eq!(stats.rows_pushed, 3);
        assert_eq!(stats.lines_rejected, 3);
        assert_eq!(stats.lines_skipped, 3);
        assert_eq!(queue.approximate_size(), 3);
    }

    #[test]
    fn invalid_utf8_is_decoded_permissively() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            ScriptStep::Bytes(b"1,\xff2".to_vec()),
            ScriptStep::Bytes(b"3,4\r".to_vec()),
        ]));
        let queue = Arc::new(BoundedRowQueue::new(4));
        let acq = AcquisitionLoop::new(&config(2), factory, queue.clone());

        acq.start().unwrap();
        assert!(wait_until(|| queue.approximate_size() == 1));
        acq.stop();
        // the replacement character makes the first frame malformed, not fatal
        assert_eq!(queue.drain_all()[0].values(), &[3, 4]);
        assert_eq!(acq.stats().lines_rejected, 1);
    }
}
