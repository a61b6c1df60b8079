//! # Serial Telemetry
//!
//! Real-time acquisition of line-oriented numeric frames from a serial-attached device
//! (a microcontroller streaming ADC or IMU samples, say) into a bounded per-channel
//! history that plotting and export code can read at any time.
//!
//! ## Pipeline
//!
//! ```text
//! transport ─▶ acquisition thread ─▶ parser ─▶ BoundedRowQueue ─▶ drain ─▶ ChannelBuffers
//!                                                                            ├─▶ downsample
//!                                                                            └─▶ export
//! ```
//!
//! The acquisition thread never waits on consumers: when they fall behind, the queue
//! drops its oldest rows. Consumers pull on their own schedule by calling
//! [`TelemetrySession::drain`] and then reading.
//!
//! ## Crate Structure
//!
//! - **`parser`**: one text frame into a fixed-width [`Row`].
//! - **`queue`**: the lock-free drop-oldest [`BoundedRowQueue`].
//! - **`transport`**: frame sources (serial port, simulator, scripted) and their factories.
//! - **`acquisition`**: the background read loop and its lifecycle.
//! - **`buffer`**: zero-filled sliding windows, one per channel, and the drain that feeds them.
//! - **`downsample`**: strided views for plotting.
//! - **`export`**: per-channel binary, text and CSV files.
//! - **`session`**: [`TelemetrySession`], the owner of all of the above.
//! - **`command`**: the textual command surface.
//! - **`config`**, **`error`**, **`logging`**: configuration, error types and tracing setup.

pub mod acquisition;
pub mod buffer;
pub mod command;
pub mod config;
pub mod downsample;
pub mod error;
pub mod export;
pub mod logging;
pub mod parser;
pub mod queue;
pub mod session;
pub mod transport;

pub use acquisition::{LoggerState, StartOutcome, StopOutcome};
pub use command::{Command, CommandReply};
pub use config::TelemetryConfig;
pub use error::{AppResult, TelemetryError};
pub use parser::{parse_line, Row};
pub use queue::BoundedRowQueue;
pub use session::TelemetrySession;
