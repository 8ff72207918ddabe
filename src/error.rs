use std::{any::Any, io, path::PathBuf};

pub use brw_format::DecodeError;

/// Every way an extraction run can fail.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// A worker thread panicked instead of returning a result
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Output {0} already exists and overwrite was not requested")]
    AlreadyExists(PathBuf),

    #[error("Permission denied writing {path}: {source}")]
    PermissionDenied { path: PathBuf, source: io::Error },

    #[error("No space left on device writing {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to create output {path}: {source}")]
    Create { path: PathBuf, source: hdf5::Error },

    /// Moving the finished file onto its destination failed
    #[error("Failed to commit {from} to {to}: {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Chunk interval must be positive, got {0} s")]
    NonPositiveInterval(f64),

    #[error("Sample rate must be positive, got {0} Hz")]
    InvalidSampleRate(f64),

    #[error("Invalid chunk size {t_chunk}: {reason}")]
    InvalidChunkSize { t_chunk: u64, reason: String },

    #[error("At least one worker is required")]
    NoWorkers,

    #[error("Output path {0} is the input file")]
    OutputIsInput(PathBuf),

    #[error("Invalid value {value:?} for {option}")]
    UnknownOption { option: &'static str, value: String },
}

/// Failures while streaming chunks through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("Short read at frame {t0}: expected {expected} samples, got {actual}")]
    TruncatedRead {
        t0: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Failed to read raw samples {start}..{end}: {source}")]
    Read {
        start: u64,
        end: u64,
        source: hdf5::Error,
    },

    #[error("Failed to write {dataset} at {offset}: {source}")]
    Write {
        dataset: &'static str,
        offset: u64,
        source: hdf5::Error,
    },

    /// Raw samples of a chunk do not form a `(frames, grid_x, grid_y)` block
    #[error("Chunk at frames {t0}..{t1} cannot be shaped into a block: {source}")]
    BlockShape {
        t0: u64,
        t1: u64,
        source: ndarray::ShapeError,
    },

    /// Sample index arithmetic does not fit the platform's address space
    #[error("Sample range for frames {t0}..{t1} overflows")]
    RangeOverflow { t0: u64, t1: u64 },
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
