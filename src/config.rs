//! Options for an extraction run and the paths it reads and writes.
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::error::ConfigError;

/// Default length of one processing chunk, in seconds of recording.
pub const DEFAULT_INTERVAL_S: f64 = 1.0;

/// Deflate level used for [`Compression::Gzip`].
pub const DEFAULT_GZIP_LEVEL: u8 = 4;

/// How the `voltage` dataset is chunked on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkPolicy {
    /// One HDF5 chunk per processing chunk
    #[default]
    Matched,
    /// Fixed number of frames per HDF5 chunk
    Explicit(u64),
    /// Contiguous storage
    None,
}

impl FromStr for ChunkPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "matched" => Ok(Self::Matched),
            "none" | "contiguous" => Ok(Self::None),
            other => other
                .parse::<u64>()
                .map(Self::Explicit)
                .map_err(|_| ConfigError::UnknownOption {
                    option: "chunk policy",
                    value: s.to_string(),
                }),
        }
    }
}

/// Filter applied to each `voltage` chunk. Ignored for contiguous storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Lzf,
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" | "deflate" => Ok(Self::Gzip),
            "lzf" => Ok(Self::Lzf),
            _ => Err(ConfigError::UnknownOption {
                option: "compression",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Target length of one processing chunk, in seconds
    pub t_interval_s: f64,
    pub chunk_policy: ChunkPolicy,
    pub compression: Compression,
    /// Replace an existing output file instead of failing
    pub overwrite: bool,
    /// Threads calibrating chunks; 1 processes chunks inline
    pub workers: usize,
    /// Log progress of every chunk
    pub verbose: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            t_interval_s: DEFAULT_INTERVAL_S,
            chunk_policy: ChunkPolicy::default(),
            compression: Compression::default(),
            overwrite: false,
            workers: 1,
            verbose: false,
        }
    }
}

impl ExtractOptions {
    /// Checks that do not need the recording. Chunk sizes are checked again
    /// against the frame count once the header is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.t_interval_s.is_nan() || self.t_interval_s <= 0.0 {
            return Err(ConfigError::NonPositiveInterval(self.t_interval_s));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if let ChunkPolicy::Explicit(0) = self.chunk_policy {
            return Err(ConfigError::InvalidChunkSize {
                t_chunk: 0,
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolved input and output paths for one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ExtractJob {
    pub fn new<I: Into<PathBuf>, O: Into<PathBuf>>(input: I, output: O) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Write next to the input, swapping its extension for `.hdf5`.
    pub fn from_input<P: AsRef<Path>>(input: P) -> Self {
        let input = input.as_ref().to_path_buf();
        let output = input.with_extension("hdf5");
        Self { input, output }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input == self.output {
            return Err(ConfigError::OutputIsInput(self.output.clone()));
        }
        Ok(())
    }
}
