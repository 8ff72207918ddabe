//! Extract BrainWave (`.brw`) microelectrode array recordings into calibrated,
//! chunked HDF5.
//!
//! The raw stream is read one time chunk at a time, reshaped from decode order
//! `(time, x, y)` into a `(x, y, time)` cube, calibrated to microvolts and
//! written into the `voltage` dataset of the output. A `time` dataset holds
//! the timestamp of every frame in seconds.
pub use brw_format;

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod processor;
pub mod progress;
pub mod source;

pub use batch::{extract_batch, BatchReport, FileOutcome};
pub use config::{ChunkPolicy, Compression, ExtractJob, ExtractOptions};
pub use error::ExtractError;
pub use pipeline::{extract, extract_with_observer, ExtractSummary};

#[cfg(doctest)]
doc_comment::doctest!("../README.md", readme);
