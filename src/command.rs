//! Text command surface.
//!
//! Each command maps onto exactly one session operation:
//!
//! | command                              | operation                     |
//! |--------------------------------------|-------------------------------|
//! | `start`                              | [`TelemetrySession::start`]   |
//! | `stop`                               | [`TelemetrySession::stop`]    |
//! | `status`                             | [`TelemetrySession::stats`]   |
//! | `depth`                              | [`TelemetrySession::queue_depth`] |
//! | `drain`                              | [`TelemetrySession::drain`]   |
//! | `clear`                              | [`TelemetrySession::clear`]   |
//! | `export [prefix] [extension] [dir]`  | [`TelemetrySession::export`]  |
//!
//! Omitted export arguments fall back to the `[export]` configuration section.

use crate::acquisition::{StartOutcome, StopOutcome};
use crate::error::{AppResult, TelemetryError};
use crate::session::{SessionStats, TelemetrySession};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// One line of the text command surface, e.g. `export run_ .txt /tmp/out`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start acquisition
    Start,
    /// Stop acquisition, bounded by the stop timeout
    Stop,
    /// Report a [`SessionStats`](crate::session::SessionStats) snapshot
    Status,
    /// Report the approximate queue depth
    Depth,
    /// Move queued rows into the buffers
    Drain,
    /// Reset every buffer to zeros
    Clear,
    /// Write one file per channel; missing words fall back to the export config
    Export {
        /// File name prefix
        prefix: Option<String>,
        /// Extension including the dot
        extension: Option<String>,
        /// Output directory
        directory: Option<PathBuf>,
    },
}

impl FromStr for Command {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(TelemetryError::UnknownCommand(String::new()));
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "depth" => Command::Depth,
            "drain" => Command::Drain,
            "clear" => Command::Clear,
            "export" | "save" => Command::Export {
                prefix: words.next().map(str::to_string),
                extension: words.next().map(str::to_string),
                directory: words.next().map(PathBuf::from),
            },
            _ => return Err(TelemetryError::UnknownCommand(s.trim().to_string())),
        };
        if words.next().is_some() {
            return Err(TelemetryError::UnknownCommand(s.trim().to_string()));
        }
        Ok(command)
    }
}

/// What a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Start(StartOutcome),
    Stop(StopOutcome),
    Status(SessionStats),
    Depth(usize),
    Drained(usize),
    Cleared,
    Exported(Vec<PathBuf>),
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReply::Start(StartOutcome::Started) => write!(f, "acquisition started"),
            CommandReply::Start(StartOutcome::AlreadyRunning) => {
                write!(f, "acquisition already running")
            }
            CommandReply::Stop(StopOutcome::Stopped) => write!(f, "acquisition stopped"),
            CommandReply::Stop(StopOutcome::NotRunning) => write!(f, "acquisition not running"),
            CommandReply::Stop(StopOutcome::TimedOut) => {
                write!(f, "stop requested; acquisition thread still exiting")
            }
            CommandReply::Status(stats) => write!(
                f,
                "state={} running={} channels={} length={} queue={}/{} drained={} read={} rejected={} errors={} evicted={}",
                stats.state,
                stats.running,
                stats.channels,
                stats.buffer_length,
                stats.queue_depth,
                stats.queue_capacity,
                stats.rows_drained,
                stats.acquisition.lines_read,
                stats.acquisition.lines_rejected,
                stats.acquisition.read_errors,
                stats.acquisition.queue_evictions,
            ),
            CommandReply::Depth(depth) => write!(f, "{depth}"),
            CommandReply::Drained(rows) => write!(f, "drained {rows} rows"),
            CommandReply::Cleared => write!(f, "buffers cleared"),
            CommandReply::Exported(paths) if paths.is_empty() => write!(f, "nothing written"),
            CommandReply::Exported(paths) => {
                write!(f, "wrote {} files:", paths.len())?;
                for path in paths {
                    write!(f, " {}", path.display())?;
                }
                Ok(())
            }
        }
    }
}

impl TelemetrySession {
    /// Run one command against this session.
    pub fn execute(&self, command: Command) -> AppResult<CommandReply> {
        debug!(?command, "Executing command");
        let reply = match command {
            Command::Start => CommandReply::Start(self.start()?),
            Command::Stop => CommandReply::Stop(self.stop()),
            Command::Status => CommandReply::Status(self.stats()),
            Command::Depth => CommandReply::Depth(self.queue_depth()),
            Command::Drain => CommandReply::Drained(self.drain()),
            Command::Clear => {
                self.clear();
                CommandReply::Cleared
            }
            Command::Export {
                prefix,
                extension,
                directory,
            } => {
                let defaults = &self.config().export;
                let prefix = prefix.unwrap_or_else(|| defaults.prefix.clone());
                let extension = extension.unwrap_or_else(|| defaults.extension.clone());
                let directory = directory.unwrap_or_else(|| defaults.directory.clone());
                CommandReply::Exported(self.export(&prefix, &extension, &directory))
            }
        };
        Ok(reply)
    }

    /// Parse and run one line of text.
    pub fn execute_line(&self, line: &str) -> AppResult<CommandReply> {
        self.execute(line.parse()?)
    }
}
