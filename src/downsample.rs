//! Strided read-only views of channel buffers for plotting.
//!
//! A renderer asking for at most `max_points` points of a 20 000-sample window gets
//! every `stride`-th sample together with its original index, so the x axis stays in
//! sample units. The stride is `ceil(len / max_points)`, which keeps the result within
//! the requested budget even when `len` is not a multiple of it.
//!
//! This deliberately replaces the floor formula `max(1, len / max_points)`, which can
//! return up to twice the budget (59 samples at 30 points gives stride 1, so 59
//! points). Both agree whenever `len` is a multiple of `max_points`.

use crate::buffer::{ChannelBuffers, ChannelRingBuffer};
use crate::error::AppResult;

/// One plotted point: original sample index and value.
pub type Point = (usize, f64);

/// Stride used to thin `len` samples down to at most `max_points`.
pub fn stride_for(len: usize, max_points: Option<usize>) -> usize {
    match max_points {
        Some(max) if max > 0 && len > max => len.div_ceil(max),
        _ => 1,
    }
}

/// Downsample one window.
pub fn downsample(buffer: &ChannelRingBuffer, max_points: Option<usize>) -> Vec<Point> {
    if max_points == Some(0) {
        return Vec::new();
    }
    let stride = stride_for(buffer.len(), max_points);
    buffer
        .iter()
        .copied()
        .enumerate()
        .step_by(stride)
        .collect()
}

/// Downsampled view of one channel. Errors if the channel does not exist.
pub fn query(
    buffers: &ChannelBuffers,
    channel: usize,
    max_points: Option<usize>,
) -> AppResult<Vec<Point>> {
    buffers.with_channel(channel, |buffer| downsample(buffer, max_points))
}

/// Downsampled view of every channel, each thinned independently.
pub fn query_all(buffers: &ChannelBuffers, max_points: Option<usize>) -> Vec<Vec<Point>> {
    buffers
        .snapshots()
        .iter()
        .map(|buffer| downsample(buffer, max_points))
        .collect()
}
