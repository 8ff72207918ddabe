//! Progress reporting for chunked extraction.
use std::{fmt, time::Duration};

use log::info;

/// Snapshot taken after each chunk is written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub chunks_done: u64,
    pub chunks_total: u64,
    /// `chunks_done / chunks_total`, in `[0, 1]`
    pub fraction: f64,
    pub elapsed_this_chunk: Duration,
    /// Time for the last chunk times the chunks still to go
    pub estimated_time_remaining: Duration,
}

impl ProgressEvent {
    pub fn new(chunks_done: u64, chunks_total: u64, elapsed_this_chunk: Duration) -> Self {
        let fraction = if chunks_total == 0 {
            1.0
        } else {
            chunks_done as f64 / chunks_total as f64
        };
        let remaining = chunks_total.saturating_sub(chunks_done);
        let estimated_time_remaining =
            Duration::try_from_secs_f64(elapsed_this_chunk.as_secs_f64() * remaining as f64)
                .unwrap_or(Duration::MAX);
        Self {
            chunks_done,
            chunks_total,
            fraction,
            elapsed_this_chunk,
            estimated_time_remaining,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Extracting BRW... {:.1}% ({}/{} chunks, {:.2} s/chunk, ~{:.0} s left)",
            self.fraction * 100.0,
            self.chunks_done,
            self.chunks_total,
            self.elapsed_this_chunk.as_secs_f64(),
            self.estimated_time_remaining.as_secs_f64()
        )
    }
}

/// Receives a [`ProgressEvent`] after every completed chunk.
pub trait ProgressObserver {
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F: FnMut(&ProgressEvent)> ProgressObserver for F {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// Logs every event at `info` level, prefixed with the recording name.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, event: &ProgressEvent) {
        info!("{}: {event}", self.label);
    }
}
