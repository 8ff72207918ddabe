use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The container itself could not be opened as HDF5
    #[error("Failed to open BRW file {path}: {source}")]
    Open {
        path: PathBuf,
        source: hdf5::Error,
    },

    /// A required recording variable is absent or empty
    #[error("Missing required field {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Raw stream length disagrees with the declared frame and channel counts
    #[error(
        "Raw stream holds {raw_len} samples, which is not {frame_count} frames of {channels} channels"
    )]
    ShapeMismatch {
        raw_len: u64,
        frame_count: u64,
        channels: u64,
    },

    #[error("Failed to read {field}: {source}")]
    Read {
        field: &'static str,
        source: hdf5::Error,
    },
}
