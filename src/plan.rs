//! Partitioning a recording into time chunks.
//!
//! Chunks are contiguous frame ranges of (nearly) equal length. Only the
//! final chunk may be shorter, so that the last bookend lands on the frame
//! count exactly.
use std::{iter, ops::Range};

use itertools::Itertools;

use crate::error::ConfigError;

/// One chunk: frames `t0..t1` of every electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position of this chunk in the plan
    pub index: u64,
    pub t0: u64,
    pub t1: u64,
}

impl ChunkSpan {
    pub fn len(&self) -> u64 {
        self.t1 - self.t0
    }

    pub fn is_empty(&self) -> bool {
        self.t1 == self.t0
    }

    /// Raw stream element range holding this chunk when every frame carries
    /// `channels` samples. `None` on overflow.
    pub fn sample_range(&self, channels: u64) -> Option<Range<u64>> {
        Some(self.t0.checked_mul(channels)?..self.t1.checked_mul(channels)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    frame_count: u64,
    step: u64,
}

impl ChunkPlan {
    /// Plan chunks of about `t_interval_s` seconds, rounded to the nearest
    /// whole number of frames (at least one).
    pub fn new(frame_count: u64, sample_rate_hz: f64, t_interval_s: f64) -> Result<Self, ConfigError> {
        if t_interval_s.is_nan() || t_interval_s <= 0.0 {
            return Err(ConfigError::NonPositiveInterval(t_interval_s));
        }
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate_hz));
        }
        // `as` saturates, so an interval longer than the recording (or
        // infinite) collapses to a single chunk.
        let step = (t_interval_s * sample_rate_hz).round() as u64;
        Ok(Self::with_step(frame_count, step))
    }

    /// Plan chunks of exactly `step` frames, except possibly the last.
    pub fn with_step(frame_count: u64, step: u64) -> Self {
        Self {
            frame_count,
            step: step.max(1),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per chunk, before the final chunk is trimmed.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn chunk_count(&self) -> u64 {
        self.frame_count.div_ceil(self.step)
    }

    /// Chunk boundaries: `0`, then every `step` frames, then `frame_count`.
    pub fn bookends(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.chunk_count())
            .map(move |i| i * self.step)
            .chain(iter::once(self.frame_count))
    }

    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + '_ {
        self.bookends()
            .tuple_windows()
            .enumerate()
            .map(|(index, (t0, t1))| ChunkSpan {
                index: index as u64,
                t0,
                t1,
            })
    }
}
