//! Reading BrainWave (`.brw`) recordings.
//!
//! A BRW file is an HDF5 container. The recording variables (frame count,
//! sampling rate, calibration constants, chip geometry) are stored as
//! one-element datasets, and the samples of every electrode are interleaved
//! into a single flat `3BData/Raw` array in `(time, x, y)` order.
//!
//! This crate only knows the container layout. Reshaping and calibrating the
//! raw stream is done by `brw-extract`.
mod error;
pub mod file;
pub mod metadata;
#[cfg(any(test, feature = "synthetic"))]
pub mod synthetic;

pub use error::DecodeError;
pub use file::BrwFile;
pub use metadata::{CalibrationTransform, RecordingMetadata};

/// Digitized sample as stored in the raw stream.
pub type RawSample = u16;

/// Paths of the datasets making up a BRW 3.x recording.
pub mod fields {
    pub const FRAME_COUNT: &str = "3BRecInfo/3BRecVars/NRecFrames";
    pub const SAMPLING_RATE: &str = "3BRecInfo/3BRecVars/SamplingRate";
    pub const SIGNAL_INVERSION: &str = "3BRecInfo/3BRecVars/SignalInversion";
    pub const MAX_VOLT: &str = "3BRecInfo/3BRecVars/MaxVolt";
    pub const MIN_VOLT: &str = "3BRecInfo/3BRecVars/MinVolt";
    pub const BIT_DEPTH: &str = "3BRecInfo/3BRecVars/BitDepth";
    pub const GRID_ROWS: &str = "3BRecInfo/3BMeaChip/NRows";
    pub const GRID_COLS: &str = "3BRecInfo/3BMeaChip/NCols";
    pub const RAW: &str = "3BData/Raw";

    /// Every scalar the header reader requires.
    pub const SCALARS: [&str; 8] = [
        FRAME_COUNT,
        SAMPLING_RATE,
        SIGNAL_INVERSION,
        MAX_VOLT,
        MIN_VOLT,
        BIT_DEPTH,
        GRID_ROWS,
        GRID_COLS,
    ];
}
