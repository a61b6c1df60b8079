//! Frame parsing.
//!
//! A frame is one line of text carrying one integer per channel, separated by runs of
//! commas and/or whitespace:
//!
//! ```text
//! 512,1023
//! 512 1023
//! 512, 1023, 4095
//! <no-data>
//! ```
//!
//! Parsing never fails loudly. A line is either turned into a [`Row`] of exactly the
//! configured width or dropped; malformed lines log a warning, blank lines and the
//! `<no-data>` sentinel are dropped silently.

use crate::error::{AppResult, TelemetryError};
use std::ops::Index;
use tracing::warn;

/// Text a device sends for a deliberately empty frame.
pub const NO_DATA_SENTINEL: &str = "<no-data>";

/// One parsed frame: exactly one integer per configured channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(Vec<i64>);

impl Row {
    /// Build a row, checking it has exactly `channels` values.
    pub fn new(values: Vec<i64>, channels: usize) -> AppResult<Self> {
        if values.len() != channels {
            return Err(TelemetryError::RowWidth {
                expected: channels,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    /// Number of values (always the session's channel count).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Rows are never empty for a valid session, but clippy wants the pair.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values in channel order.
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<i64> {
        self.0
    }
}

impl Index<usize> for Row {
    type Output = i64;

    fn index(&self, channel: usize) -> &i64 {
        &self.0[channel]
    }
}

/// Parse one frame into a row of `expected_channels` integers.
///
/// Returns `None` for blank lines, the `<no-data>` sentinel, lines with a non-integer
/// token and lines with the wrong number of tokens. Only the last two are logged.
pub fn parse_line(line: &str, expected_channels: usize) -> Option<Row> {
    match classify(line, expected_channels) {
        Parsed::Row(row) => Some(row),
        Parsed::Skipped => None,
        Parsed::Rejected(reason) => {
            match reason {
                Rejection::NotInteger => {
                    warn!(line, "Non-integer in line, dropping frame");
                }
                Rejection::WrongWidth(actual) => {
                    warn!(
                        line,
                        expected = expected_channels,
                        actual,
                        "Unexpected value count, dropping frame"
                    );
                }
            }
            None
        }
    }
}

enum Parsed {
    Row(Row),
    Skipped,
    Rejected(Rejection),
}

enum Rejection {
    NotInteger,
    WrongWidth(usize),
}

fn classify(line: &str, expected_channels: usize) -> Parsed {
    let line = line.trim();
    if line.is_empty() || line == NO_DATA_SENTINEL {
        return Parsed::Skipped;
    }

    let mut values = Vec::with_capacity(expected_channels);
    for token in split_fields(line) {
        match token.parse::<i64>() {
            Ok(value) => values.push(value),
            Err(_) => return Parsed::Rejected(Rejection::NotInteger),
        }
    }

    if values.len() != expected_channels {
        return Parsed::Rejected(Rejection::WrongWidth(values.len()));
    }
    Parsed::Row(Row(values))
}

/// Split on runs of separators. A leading or trailing comma yields an empty field,
/// which then fails integer conversion.
fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    let leading = line.starts_with(',').then_some("");
    let trailing = line.ends_with(',').then_some("");
    leading
        .into_iter()
        .chain(
            line.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|field| !field.is_empty()),
        )
        .chain(trailing)
}

/// Counts of what the parser did with the lines it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Lines turned into rows
    pub accepted: u64,
    /// Blank lines and `<no-data>` frames
    pub skipped: u64,
    /// Malformed lines (warned about)
    pub rejected: u64,
}

/// Stateful parser bound to a channel count.
#[derive(Debug, Clone)]
pub struct LineParser {
    channels: usize,
    stats: ParseStats,
}

impl LineParser {
    /// Parser expecting `channels` values per line, with zeroed counters.
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            stats: ParseStats::default(),
        }
    }

    /// Values expected per line.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Parse one line, updating the counters.
    pub fn parse(&mut self, line: &str) -> Option<Row> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == NO_DATA_SENTINEL {
            self.stats.skipped += 1;
            return None;
        }
        match parse_line(trimmed, self.channels) {
            Some(row) => {
                self.stats.accepted += 1;
                Some(row)
            }
            None => {
                self.stats.rejected += 1;
                None
            }
        }
    }

    /// Totals since this parser was created.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}
