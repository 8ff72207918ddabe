//! Where the processor pulls raw samples from.
use std::ops::Range;

use brw_format::{BrwFile, RawSample, RecordingMetadata};

use crate::error::IoError;

/// A recording whose raw stream can be read one range at a time.
pub trait SampleSource {
    fn metadata(&self) -> &RecordingMetadata;

    /// Read raw stream elements `range`, in decode order.
    fn read_samples(&self, range: Range<u64>) -> Result<Vec<RawSample>, IoError>;
}

impl SampleSource for BrwFile {
    fn metadata(&self) -> &RecordingMetadata {
        BrwFile::metadata(self)
    }

    fn read_samples(&self, range: Range<u64>) -> Result<Vec<RawSample>, IoError> {
        let Range { start, end } = range;
        let overflow = || IoError::RangeOverflow { t0: start, t1: end };
        let start_idx = usize::try_from(start).map_err(|_| overflow())?;
        let end_idx = usize::try_from(end).map_err(|_| overflow())?;
        BrwFile::read_samples(self, start_idx..end_idx)
            .map_err(|source| IoError::Read { start, end, source })
    }
}

/// Raw stream held in memory, for exercising the processor without files.
#[cfg(test)]
pub(crate) struct MemorySource {
    pub metadata: RecordingMetadata,
    pub raw: Vec<RawSample>,
}

#[cfg(test)]
impl MemorySource {
    pub fn new(frame_count: u64, grid_x: u32, grid_y: u32, raw: Vec<RawSample>) -> Self {
        let metadata = RecordingMetadata {
            frame_count,
            grid_x,
            grid_y,
            sample_rate_hz: 10.0,
            signal_inversion: 1.0,
            v_min: -4096.0,
            v_max: 4096.0,
            bit_depth: 12,
            raw_len: raw.len() as u64,
        };
        Self { metadata, raw }
    }
}

#[cfg(test)]
impl SampleSource for MemorySource {
    fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    // Short reads at the end of the stream are passed through so callers
    // can detect them.
    fn read_samples(&self, range: Range<u64>) -> Result<Vec<RawSample>, IoError> {
        let len = self.raw.len();
        let start = (range.start as usize).min(len);
        let end = (range.end as usize).min(len);
        Ok(self.raw[start..end].to_vec())
    }
}
