//! Line-oriented byte transports.
//!
//! The acquisition loop only sees a [`FrameSource`]: something that yields one complete
//! line per call, or nothing if the read timeout passed without one. Sources are
//! created by a [`TransportFactory`] each time acquisition starts and released by
//! dropping them, which happens exactly once per successful open.
//!
//! Three sources ship with the crate:
//! - [`SerialTransport`]: a real port via the `serialport` crate (feature
//!   `instrument_serial`), 8 data bits, no parity, one stop bit, no flow control.
//! - [`SimulatedSource`]: synthetic multi-channel sine waves with noise, for running
//!   without hardware.
//! - [`ScriptedSource`]: replays a fixed list of lines and errors. Used by tests.

use crate::config::{SerialSettings, SimulationSettings};
use crate::error::{AppResult, TelemetryError};
use rand::Rng;
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A source of newline-terminated frames.
pub trait FrameSource: Send {
    /// Read the next complete line, without its `\n`.
    ///
    /// `Ok(None)` means the read timeout elapsed without a complete line. Errors are
    /// transient from the loop's point of view: it logs them and reads again.
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// Opens a fresh [`FrameSource`] for each acquisition run.
pub trait TransportFactory: Send + Sync {
    /// Open the transport described by `settings`; failures end the run before reading.
    fn open(&self, settings: &SerialSettings) -> AppResult<Box<dyn FrameSource>>;
}

/// Lines longer than this without a terminator are discarded.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Pull the first complete line out of `pending`, if any.
fn take_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    Some(line)
}

// --- serial ---------------------------------------------------------------

/// Real serial port.
///
/// Bytes that arrive without a terminator stay buffered across timeouts, so a frame
/// split over two reads is still delivered whole.
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    port_name: String,
    pending: Vec<u8>,
    chunk: [u8; 1024],
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    /// Open `settings.port` at `settings.baud_rate`, 8N1, no flow control.
    pub fn open(settings: &SerialSettings) -> AppResult<Self> {
        use serialport::{DataBits, FlowControl, Parity, StopBits};

        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| TelemetryError::TransportOpen {
                port: settings.port.clone(),
                message: e.to_string(),
            })?;

        info!(port = %settings.port, baud = settings.baud_rate, "Serial connection opened");
        Ok(Self {
            port,
            port_name: settings.port.clone(),
            pending: Vec::with_capacity(256),
            chunk: [0u8; 1024],
        })
    }
}

#[cfg(feature = "instrument_serial")]
impl FrameSource for SerialTransport {
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        use std::io::Read;

        if let Some(line) = take_line(&mut self.pending) {
            return Ok(Some(line));
        }

        match self.port.read(&mut self.chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.pending.extend_from_slice(&self.chunk[..n]);
                if self.pending.len() > MAX_PENDING_BYTES && !self.pending.contains(&b'\n') {
                    warn!(
                        port = %self.port_name,
                        bytes = self.pending.len(),
                        "No line terminator seen, discarding buffered bytes"
                    );
                    self.pending.clear();
                }
                Ok(take_line(&mut self.pending))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.port_name)
    }
}

#[cfg(feature = "instrument_serial")]
impl Drop for SerialTransport {
    fn drop(&mut self) {
        info!(port = %self.port_name, "Serial connection closed");
    }
}

/// Factory for [`SerialTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortFactory;

impl TransportFactory for SerialPortFactory {
    #[cfg(feature = "instrument_serial")]
    fn open(&self, settings: &SerialSettings) -> AppResult<Box<dyn FrameSource>> {
        Ok(Box::new(SerialTransport::open(settings)?))
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn open(&self, _settings: &SerialSettings) -> AppResult<Box<dyn FrameSource>> {
        Err(TelemetryError::SerialFeatureDisabled)
    }
}

/// Names of the serial ports visible to the OS.
#[cfg(feature = "instrument_serial")]
pub fn list_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(not(feature = "instrument_serial"))]
pub fn list_ports() -> AppResult<Vec<String>> {
    Err(TelemetryError::SerialFeatureDisabled)
}

// --- simulated --------------------------------------------------------------

/// Synthetic device: channel `i` is a `5 + i` Hz sine over a 12-bit range plus noise,
/// emitted at a fixed frame rate.
pub struct SimulatedSource {
    channels: usize,
    period: Duration,
    sample_rate_hz: f64,
    noise: f64,
    read_timeout: Duration,
    next_due: Instant,
    sample: u64,
}

impl SimulatedSource {
    pub fn new(channels: usize, simulation: &SimulationSettings, read_timeout: Duration) -> Self {
        let rate = if simulation.sample_rate_hz > 0.0 {
            simulation.sample_rate_hz
        } else {
            1.0
        };
        Self {
            channels,
            period: Duration::from_secs_f64(1.0 / rate),
            sample_rate_hz: rate,
            noise: simulation.noise.clamp(0.0, 1.0),
            read_timeout,
            next_due: Instant::now(),
            sample: 0,
        }
    }

    fn frame(&mut self) -> Vec<u8> {
        let t = self.sample as f64 / self.sample_rate_hz;
        let mut rng = rand::thread_rng();
        let values: Vec<String> = (0..self.channels)
            .map(|ch| {
                let freq = 5.0 + ch as f64;
                let wave = (TAU * freq * t).sin();
                let jitter = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                let value = 2048.0 + 1800.0 * wave + 2048.0 * jitter;
                (value.round() as i64).clamp(0, 4095).to_string()
            })
            .collect();
        self.sample += 1;
        values.join(",").into_bytes()
    }
}

impl FrameSource for SimulatedSource {
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let now = Instant::now();
        if now < self.next_due {
            let wait = self.next_due - now;
            if wait > self.read_timeout {
                std::thread::sleep(self.read_timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        } else if now.duration_since(self.next_due) > Duration::from_secs(1) {
            // fell far behind (suspended process, debugger): resync instead of bursting
            self.next_due = now;
        }
        self.next_due += self.period;
        Ok(Some(self.frame()))
    }

    fn describe(&self) -> String {
        format!("simulated:{}ch@{}Hz", self.channels, self.sample_rate_hz)
    }
}

/// Factory for [`SimulatedSource`].
#[derive(Debug, Clone)]
pub struct SimulatedFactory {
    channels: usize,
    simulation: SimulationSettings,
}

impl SimulatedFactory {
    pub fn new(channels: usize, simulation: SimulationSettings) -> Self {
        Self {
            channels,
            simulation,
        }
    }
}

impl TransportFactory for SimulatedFactory {
    fn open(&self, settings: &SerialSettings) -> AppResult<Box<dyn FrameSource>> {
        debug!(
            channels = self.channels,
            rate = self.simulation.sample_rate_hz,
            "Opening simulated source"
        );
        Ok(Box::new(SimulatedSource::new(
            self.channels,
            &self.simulation,
            settings.read_timeout(),
        )))
    }
}

// --- scripted ---------------------------------------------------------------

/// One scripted read outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// A complete line (terminator added by the source)
    Line(String),
    /// Raw bytes, delivered verbatim as one frame
    Bytes(Vec<u8>),
    /// A transient read error
    Error(io::ErrorKind),
}

/// Replays a fixed script, then times out on every further read.
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    read_timeout: Duration,
    closed: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.steps.pop_front() {
            Some(ScriptStep::Line(line)) => Ok(Some(line.into_bytes())),
            Some(ScriptStep::Bytes(bytes)) => Ok(Some(bytes)),
            Some(ScriptStep::Error(kind)) => Err(io::Error::new(kind, "scripted read error")),
            None => {
                std::thread::sleep(self.read_timeout);
                Ok(None)
            }
        }
    }

    fn describe(&self) -> String {
        format!("scripted:{} steps left", self.steps.len())
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory for [`ScriptedSource`], counting opens and closes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    steps: Vec<ScriptStep>,
    fail_open: bool,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    /// Factory replaying `steps` from the start on every open.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Script made only of lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|l| ScriptStep::Line(l.into())).collect())
    }

    /// A factory whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    /// Successful opens so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sources released so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TransportFactory for ScriptedFactory {
    fn open(&self, settings: &SerialSettings) -> AppResult<Box<dyn FrameSource>> {
        if self.fail_open {
            return Err(TelemetryError::TransportOpen {
                port: settings.port.clone(),
                message: "scripted open failure".into(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            steps: self.steps.iter().cloned().collect(),
            read_timeout: settings.read_timeout(),
            closed: Arc::clone(&self.closed),
        }))
    }
}
