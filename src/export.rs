//! Export of channel buffers to files.
//!
//! One file per channel, named `{prefix}{channel + 1}{extension}`:
//!
//! - `.dat` / `.bin` (any case): raw native-endian `f64` values, no header, no
//!   delimiter. A 20 000 sample window becomes a 160 000 byte file.
//! - anything else: one decimal value per line with six fractional digits.
//!
//! Exports are not transactional. A channel that fails to write is logged and skipped;
//! the returned list holds only the paths that were written, so a short list means
//! partial success.
//!
//! With the `storage_csv` feature, [`save_csv`] adds CSV output with optional
//! timestamps, a single combined file, and trimming of the zero prefill.

use crate::buffer::{ChannelBuffers, ChannelRingBuffer};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Extensions written as raw binary.
pub const BINARY_EXTENSIONS: [&str; 2] = ["dat", "bin"];

/// Whether `extension` selects raw binary output.
pub fn is_binary_extension(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.');
    BINARY_EXTENSIONS
        .iter()
        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
}

/// Output path for a 0-based channel index.
pub fn channel_path(directory: &Path, prefix: &str, channel: usize, extension: &str) -> PathBuf {
    directory.join(format!("{prefix}{}{extension}", channel + 1))
}

/// Write every channel to `{directory}/{prefix}{n}{extension}`. Returns written paths.
pub fn save(
    buffers: &ChannelBuffers,
    prefix: &str,
    extension: &str,
    directory: &Path,
) -> Vec<PathBuf> {
    if let Err(e) = fs::create_dir_all(directory) {
        error!(directory = %directory.display(), error = %e, "Cannot create export directory");
        return Vec::new();
    }

    let binary = is_binary_extension(extension);
    let mut written = Vec::new();
    for (channel, buffer) in buffers.snapshots().iter().enumerate() {
        let path = channel_path(directory, prefix, channel, extension);
        let result = if binary {
            write_binary(&path, buffer)
        } else {
            write_text(&path, buffer)
        };
        match result {
            Ok(()) => {
                info!(
                    channel = channel + 1,
                    path = %path.display(),
                    format = if binary { "binary" } else { "text" },
                    "Saved channel data"
                );
                written.push(path);
            }
            Err(e) => {
                error!(channel = channel + 1, path = %path.display(), error = %e, "Error saving channel data");
            }
        }
    }

    if !written.is_empty() {
        info!(files = written.len(), "Export complete");
    }
    written
}

fn write_binary(path: &Path, buffer: &ChannelRingBuffer) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in buffer.iter() {
        out.write_all(&value.to_ne_bytes())?;
    }
    out.flush()
}

fn write_text(path: &Path, buffer: &ChannelRingBuffer) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in buffer.iter() {
        writeln!(out, "{value:.6}")?;
    }
    out.flush()
}

/// Read back a binary export. Used by tools and tests.
pub fn read_binary(path: &Path) -> std::io::Result<Vec<f64>> {
    let bytes = fs::read(path)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_ne_bytes(raw)
        })
        .collect())
}

/// Options for CSV export.
#[cfg(feature = "storage_csv")]
#[derive(Debug, Clone)]
pub struct CsvExportOptions {
    /// Output directory, created if missing
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Export only samples that came from real data, dropping the zero prefill
    pub skip_initial_zeros: bool,
    /// Adds a `time_s` column when set to a positive, finite rate
    pub sample_rate: Option<f64>,
    /// Time of the first exported sample, in seconds
    pub timestamp_start: f64,
    /// One `{prefix}combined.csv` instead of per-channel files
    pub combined: bool,
}

#[cfg(feature = "storage_csv")]
impl Default for CsvExportOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: "channel".to_string(),
            skip_initial_zeros: false,
            sample_rate: None,
            timestamp_start: 0.0,
            combined: false,
        }
    }
}

#[cfg(feature = "storage_csv")]
impl CsvExportOptions {
    /// The rate used for the `time_s` column. Non-positive or non-finite rates are
    /// ignored, so header and records always agree on the column count.
    pub fn time_rate(&self) -> Option<f64> {
        self.sample_rate.filter(|rate| rate.is_finite() && *rate > 0.0)
    }

    fn timestamp(&self, index: usize) -> Option<f64> {
        self.time_rate()
            .map(|rate| self.timestamp_start + index as f64 / rate)
    }
}

/// Write channels as CSV. Same partial-success contract as [`save`].
#[cfg(feature = "storage_csv")]
pub fn save_csv(buffers: &ChannelBuffers, options: &CsvExportOptions) -> Vec<PathBuf> {
    if let Err(e) = fs::create_dir_all(&options.directory) {
        error!(directory = %options.directory.display(), error = %e, "Cannot create export directory");
        return Vec::new();
    }

    let columns: Vec<Vec<f64>> = buffers
        .snapshots()
        .iter()
        .map(|buffer| {
            if options.skip_initial_zeros {
                buffer.filled_to_vec()
            } else {
                buffer.to_vec()
            }
        })
        .collect();

    if options.combined {
        let path = options.directory.join(format!("{}combined.csv", options.prefix));
        return match write_combined_csv(&path, &columns, options) {
            Ok(()) => {
                info!(path = %path.display(), channels = columns.len(), "Saved combined CSV");
                vec![path]
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error saving combined CSV");
                Vec::new()
            }
        };
    }

    let mut written = Vec::new();
    for (channel, column) in columns.iter().enumerate() {
        let path = channel_path(&options.directory, &options.prefix, channel, ".csv");
        match write_channel_csv(&path, channel, column, options) {
            Ok(()) => {
                info!(channel = channel + 1, path = %path.display(), rows = column.len(), "Saved channel CSV");
                written.push(path);
            }
            Err(e) => {
                error!(channel = channel + 1, path = %path.display(), error = %e, "Error saving channel CSV");
            }
        }
    }
    written
}

#[cfg(feature = "storage_csv")]
fn write_channel_csv(
    path: &Path,
    channel: usize,
    column: &[f64],
    options: &CsvExportOptions,
) -> crate::error::AppResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let value_header = format!("ch{}", channel + 1);
    if options.time_rate().is_some() {
        writer.write_record(["time_s", value_header.as_str()])?;
    } else {
        writer.write_record([value_header.as_str()])?;
    }
    for (i, value) in column.iter().enumerate() {
        match options.timestamp(i) {
            Some(t) => writer.write_record([format!("{t:.6}"), format!("{value:.6}")])?,
            None => writer.write_record([format!("{value:.6}")])?,
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(feature = "storage_csv")]
fn write_combined_csv(
    path: &Path,
    columns: &[Vec<f64>],
    options: &CsvExportOptions,
) -> crate::error::AppResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);

    let mut header = Vec::with_capacity(columns.len() + 1);
    if options.time_rate().is_some() {
        header.push("time_s".to_string());
    }
    header.extend((1..=columns.len()).map(|c| format!("ch{c}")));
    writer.write_record(&header)?;

    for i in 0..rows {
        let mut record = Vec::with_capacity(header.len());
        if let Some(t) = options.timestamp(i) {
            record.push(format!("{t:.6}"));
        }
        for column in columns {
            // shorter columns are aligned on their newest sample
            let offset = rows - column.len();
            record.push(match i.checked_sub(offset).and_then(|j| column.get(j)) {
                Some(value) => format!("{value:.6}"),
                None => String::new(),
            });
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Row;
    use crate::queue::BoundedRowQueue;

    fn buffers_with(rows: &[&[i64]], length: usize) -> ChannelBuffers {
        let channels = rows.first().map_or(1, |r| r.len());
        let buffers = ChannelBuffers::new(channels, length);
        let queue = BoundedRowQueue::new(rows.len().max(1));
        for values in rows {
            queue.push(Row::new(values.to_vec(), channels).unwrap());
        }
        buffers.drain(&queue);
        buffers
    }

    #[test]
    fn binary_extension_detection() {
        assert!(is_binary_extension(".dat"));
        assert!(is_binary_extension(".BIN"));
        assert!(is_binary_extension("dat"));
        assert!(!is_binary_extension(".txt"));
        assert!(!is_binary_extension(".csv"));
    }

    #[test]
    fn binary_export_is_eight_bytes_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = buffers_with(&[&[1], &[2], &[3]], 3);

        let written = save(&buffers, "channel", ".dat", dir.path());
        assert_eq!(written, vec![dir.path().join("channel1.dat")]);
        assert_eq!(fs::metadata(&written[0]).unwrap().len(), 24);
        assert_eq!(read_binary(&written[0]).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn text_export_writes_fixed_precision_lines() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = buffers_with(&[&[5, -1]], 2);

        let written = save(&buffers, "run_", ".txt", dir.path());
        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("run_1.txt")).unwrap(),
            "0.000000\n5.000000\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("run_2.txt")).unwrap(),
            "0.000000\n-1.000000\n"
        );
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let buffers = ChannelBuffers::new(2, 4);
        let written = save(&buffers, "ch", ".bin", &nested);
        assert_eq!(written.len(), 2);
        assert!(nested.join("ch2.bin").exists());
    }

    #[test]
    fn failing_channel_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        // a directory squatting on channel 1's file name makes that write fail
        fs::create_dir(dir.path().join("ch1.dat")).unwrap();
        let buffers = ChannelBuffers::new(3, 4);

        let written = save(&buffers, "ch", ".dat", dir.path());
        assert_eq!(
            written,
            vec![dir.path().join("ch2.dat"), dir.path().join("ch3.dat")]
        );
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn csv_with_timestamps_skips_prefill() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = buffers_with(&[&[10], &[20]], 5);
        let options = CsvExportOptions {
            directory: dir.path().to_path_buf(),
            prefix: "test_".into(),
            skip_initial_zeros: true,
            sample_rate: Some(1000.0),
            ..Default::default()
        };

        let written = save_csv(&buffers, &options);
        assert_eq!(written, vec![dir.path().join("test_1.csv")]);
        let text = fs::read_to_string(&written[0]).unwrap();
        assert_eq!(text, "time_s,ch1\n0.000000,10.000000\n0.001000,20.000000\n");
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn combined_csv_has_one_column_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = buffers_with(&[&[1, 2, 3], &[4, 5, 6]], 4);
        let options = CsvExportOptions {
            directory: dir.path().to_path_buf(),
            prefix: "run_".into(),
            skip_initial_zeros: true,
            combined: true,
            ..Default::default()
        };

        let written = save_csv(&buffers, &options);
        assert_eq!(written, vec![dir.path().join("run_combined.csv")]);
        let text = fs::read_to_string(&written[0]).unwrap();
        assert_eq!(
            text,
            "ch1,ch2,ch3\n1.000000,2.000000,3.000000\n4.000000,5.000000,6.000000\n"
        );
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn non_positive_rate_writes_csv_without_time_column() {
        let dir = tempfile::tempdir().unwrap();
        let buffers = buffers_with(&[&[1, 2], &[3, 4]], 2);

        for rate in [0.0, -5.0, f64::NAN] {
            let options = CsvExportOptions {
                directory: dir.path().to_path_buf(),
                prefix: "rate_".into(),
                sample_rate: Some(rate),
                ..Default::default()
            };
            assert_eq!(options.time_rate(), None);

            let written = save_csv(&buffers, &options);
            assert_eq!(
                written,
                vec![dir.path().join("rate_1.csv"), dir.path().join("rate_2.csv")]
            );
            let text = fs::read_to_string(&written[1]).unwrap();
            assert_eq!(text, "ch2\n2.000000\n4.000000\n");

            let combined = save_csv(&buffers, &CsvExportOptions { combined: true, ..options });
            let text = fs::read_to_string(&combined[0]).unwrap();
            assert!(text.starts_with("ch1,ch2\n"));
        }
    }
}
