//! Per-channel sliding windows and the drain that feeds them.
//!
//! Every channel keeps exactly `length` samples at all times. A new buffer (and a
//! cleared one) is full of zeros; each appended sample pushes the oldest one out.
//!
//! [`ChannelBuffers::drain`] is the only writer. It moves every queued row into the
//! buffers, row by row, so position `i` in channel 0 and position `i` in channel 3 are
//! always the same acquisition instant. Drain passes hold the write lock for their
//! whole duration, which both serializes concurrent drains and keeps readers from
//! seeing a row half-applied.

use crate::error::{AppResult, TelemetryError};
use crate::parser::Row;
use crate::queue::BoundedRowQueue;
use parking_lot::RwLock;
use std::collections::VecDeque;
use tracing::trace;

/// Default number of samples retained per channel.
pub const DEFAULT_BUFFER_LENGTH: usize = 20_000;

/// Fixed-length sliding window of samples for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRingBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
    filled: usize,
}

impl ChannelRingBuffer {
    /// A zero-filled window of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat(0.0).take(capacity).collect(),
            capacity,
            filled: 0,
        }
    }

    /// Append one sample, evicting the oldest.
    pub fn append(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.filled = (self.filled + 1).min(self.capacity);
    }

    /// Always equal to the capacity.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Never true; the window is zero-filled rather than empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many of the trailing samples came from real data since the last clear.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Oldest-first iterator over the window.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &f64> + '_ {
        self.samples.iter()
    }

    /// Copy of the window, oldest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Copy of the samples that came from real data, oldest first.
    pub fn filled_to_vec(&self) -> Vec<f64> {
        self.samples
            .iter()
            .skip(self.capacity - self.filled)
            .copied()
            .collect()
    }

    /// Reset to all zeros. The length does not change.
    pub fn clear(&mut self) {
        self.samples.iter_mut().for_each(|v| *v = 0.0);
        self.filled = 0;
    }
}

/// The set of channel windows owned by a session.
#[derive(Debug)]
pub struct ChannelBuffers {
    channels: RwLock<Vec<ChannelRingBuffer>>,
    length: usize,
}

impl ChannelBuffers {
    /// `channels` zero-filled windows of `length` samples (at least one).
    pub fn new(channels: usize, length: usize) -> Self {
        let length = length.max(1);
        Self {
            channels: RwLock::new((0..channels).map(|_| ChannelRingBuffer::new(length)).collect()),
            length,
        }
    }

    /// Number of channel windows.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Samples kept per channel.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Move every queued row into the buffers, in arrival order. Returns rows processed.
    pub fn drain(&self, queue: &BoundedRowQueue) -> usize {
        let mut channels = self.channels.write();
        let rows = queue.drain_all();
        for row in &rows {
            apply_row(&mut channels, row);
        }
        if !rows.is_empty() {
            trace!(rows = rows.len(), "Drained rows into channel buffers");
        }
        rows.len()
    }

    /// Reset every channel to its zero-filled state.
    pub fn clear(&self) {
        for channel in self.channels.write().iter_mut() {
            channel.clear();
        }
    }

    /// Copy of one channel's window.
    pub fn snapshot(&self, channel: usize) -> AppResult<ChannelRingBuffer> {
        let channels = self.channels.read();
        channels
            .get(channel)
            .cloned()
            .ok_or(TelemetryError::ChannelOutOfRange {
                channel,
                channels: channels.len(),
            })
    }

    /// Copy of every channel, taken under one lock so they line up sample-for-sample.
    pub fn snapshots(&self) -> Vec<ChannelRingBuffer> {
        self.channels.read().clone()
    }

    /// Run `f` against one channel without copying it.
    pub fn with_channel<T>(
        &self,
        channel: usize,
        f: impl FnOnce(&ChannelRingBuffer) -> T,
    ) -> AppResult<T> {
        let channels = self.channels.read();
        let buffer = channels.get(channel).ok_or(TelemetryError::ChannelOutOfRange {
            channel,
            channels: channels.len(),
        })?;
        Ok(f(buffer))
    }

    /// Newest sample of every channel.
    pub fn latest(&self) -> Vec<f64> {
        self.channels
            .read()
            .iter()
            .map(|c| c.iter().last().copied().unwrap_or(0.0))
            .collect()
    }
}

fn apply_row(channels: &mut [ChannelRingBuffer], row: &Row) {
    for (buffer, &value) in channels.iter_mut().zip(row.values()) {
        buffer.append(value as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[i64]) -> Row {
        Row::new(values.to_vec(), values.len()).unwrap()
    }

    #[test]
    fn new_buffer_is_zero_filled() {
        let buffer = ChannelRingBuffer::new(5);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.to_vec(), vec![0.0; 5]);
        assert_eq!(buffer.filled(), 0);
    }

    #[test]
    fn append_three_into_length_five() {
        let mut buffer = ChannelRingBuffer::new(5);
        for v in [7.0, 8.0, 9.0] {
            buffer.append(v);
        }
        assert_eq!(buffer.to_vec(), vec![0.0, 0.0, 7.0, 8.0, 9.0]);
        assert_eq!(buffer.filled_to_vec(), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn overflow_keeps_last_capacity_values() {
        let mut buffer = ChannelRingBuffer::new(4);
        for v in 0..11 {
            buffer.append(v as f64);
            assert_eq!(buffer.len(), 4);
        }
        assert_eq!(buffer.to_vec(), vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(buffer.filled(), 4);
    }

    #[test]
    fn clear_restores_zeros_at_full_length() {
        let mut buffer = ChannelRingBuffer::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            buffer.append(v);
        }
        buffer.clear();
        assert_eq!(buffer.to_vec(), vec![0.0; 3]);
        assert_eq!(buffer.filled(), 0);
        assert!(buffer.filled_to_vec().is_empty());
    }

    #[test]
    fn drain_updates_each_channel_in_row_order() {
        let queue = BoundedRowQueue::new(16);
        let buffers = ChannelBuffers::new(3, 6);
        queue.push(row(&[1, 2, 3]));
        queue.push(row(&[4, 5, 6]));

        assert_eq!(buffers.drain(&queue), 2);
        assert_eq!(queue.approximate_size(), 0);

        let snaps = buffers.snapshots();
        assert_eq!(snaps[0].to_vec()[4..], [1.0, 4.0]);
        assert_eq!(snaps[1].to_vec()[4..], [2.0, 5.0]);
        assert_eq!(snaps[2].to_vec()[4..], [3.0, 6.0]);
    }

    #[test]
    fn drain_on_empty_queue_is_noop() {
        let queue = BoundedRowQueue::new(4);
        let buffers = ChannelBuffers::new(2, 4);
        assert_eq!(buffers.drain(&queue), 0);
        assert_eq!(buffers.latest(), vec![0.0, 0.0]);
    }

    #[test]
    fn clear_resets_every_channel() {
        let queue = BoundedRowQueue::new(4);
        let buffers = ChannelBuffers::new(2, 3);
        queue.push(row(&[9, 9]));
        buffers.drain(&queue);
        buffers.clear();
        for snap in buffers.snapshots() {
            assert_eq!(snap.to_vec(), vec![0.0; 3]);
        }
    }

    #[test]
    fn snapshot_rejects_unknown_channel() {
        let buffers = ChannelBuffers::new(2, 3);
        assert!(matches!(
            buffers.snapshot(2),
            Err(TelemetryError::ChannelOutOfRange {
                channel: 2,
                channels: 2
            })
        ));
    }

    #[test]
    fn concurrent_readers_see_aligned_channels() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(BoundedRowQueue::new(1024));
        let buffers = Arc::new(ChannelBuffers::new(2, 32));

        let reader = {
            let buffers = Arc::clone(&buffers);
            thread::spawn(move || {
                for _ in 0..500 {
                    let snaps = buffers.snapshots();
                    // every row carries (v, -v); alignment means the pair always matches
                    for (a, b) in snaps[0].iter().zip(snaps[1].iter()) {
                        assert_eq!(*a, -*b);
                    }
                }
            })
        };

        for v in 0..2_000 {
            queue.push(row(&[v, -v]));
            if v % 7 == 0 {
                buffers.drain(&queue);
            }
        }
        buffers.drain(&queue);
        reader.join().unwrap();
        assert_eq!(buffers.latest(), vec![1999.0, -1999.0]);
    }
}
