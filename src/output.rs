//! The HDF5 file extraction writes into.
//!
//! The output is built under a hidden sibling path and only renamed onto its
//! destination by [`Hdf5Output::commit`]. Dropping an uncommitted output
//! removes the partial file, so a failed run never leaves a truncated file
//! where a finished one is expected.
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use brw_format::{CalibrationTransform, RecordingMetadata};
use hdf5::{types::VarLenUnicode, Dataset, File, Location};
use log::{debug, warn};
use ndarray::{s, Array1, ArrayView3};
use uuid::Uuid;

use crate::{
    config::{ChunkPolicy, Compression, ExtractOptions, DEFAULT_GZIP_LEVEL},
    error::{ConfigError, ExtractError, IoError, OutputError},
    plan::ChunkPlan,
};

pub const VOLTAGE: &str = "voltage";
pub const TIME: &str = "time";

/// Largest number of time values materialized at once.
pub const TIME_BLOCK_LEN: usize = 1 << 20;

/// HDF5 refuses chunks of 4 GiB or more.
const MAX_CHUNK_BYTES: u64 = (u32::MAX as u64) - 1;

const SOFTWARE: &str = env!("CARGO_PKG_NAME");
const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shape and storage of the `voltage` dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    /// `(grid_x, grid_y, frame_count)`
    pub shape: [usize; 3],
    /// `None` for contiguous storage
    pub chunk: Option<[usize; 3]>,
    /// Always `Compression::None` when `chunk` is `None`
    pub compression: Compression,
}

impl OutputLayout {
    pub fn new(
        metadata: &RecordingMetadata,
        plan: &ChunkPlan,
        options: &ExtractOptions,
    ) -> Result<Self, ExtractError> {
        let overflow = || IoError::RangeOverflow {
            t0: 0,
            t1: metadata.frame_count,
        };
        let frames = usize::try_from(metadata.frame_count).map_err(|_| overflow())?;
        let shape = [metadata.grid_x as usize, metadata.grid_y as usize, frames];
        let frame_bytes = metadata.channel_count() * std::mem::size_of::<f32>() as u64;

        let t_chunk = match options.chunk_policy {
            ChunkPolicy::None => None,
            ChunkPolicy::Matched => {
                let limit = (MAX_CHUNK_BYTES / frame_bytes).max(1);
                let t_chunk = plan.step().min(metadata.frame_count);
                if t_chunk > limit {
                    debug!("Matched chunk of {t_chunk} frames exceeds the HDF5 limit, using {limit}");
                }
                Some(t_chunk.min(limit))
            }
            ChunkPolicy::Explicit(t_chunk) => {
                if t_chunk == 0 {
                    return Err(invalid_chunk(t_chunk, "must be positive"));
                }
                if t_chunk > metadata.frame_count {
                    return Err(invalid_chunk(
                        t_chunk,
                        &format!("recording has only {} frames", metadata.frame_count),
                    ));
                }
                Some(t_chunk)
            }
        };

        let chunk = match t_chunk {
            Some(t_chunk) => {
                if t_chunk.saturating_mul(frame_bytes) > MAX_CHUNK_BYTES {
                    return Err(invalid_chunk(t_chunk, "chunk would exceed 4 GiB"));
                }
                let t_chunk = usize::try_from(t_chunk).map_err(|_| overflow())?;
                Some([shape[0], shape[1], t_chunk])
            }
            None => None,
        };

        let compression = if chunk.is_none() && options.compression != Compression::None {
            warn!(
                "Compression {:?} needs chunked storage, writing uncompressed",
                options.compression
            );
            Compression::None
        } else {
            options.compression
        };

        Ok(Self {
            shape,
            chunk,
            compression,
        })
    }
}

fn invalid_chunk(t_chunk: u64, reason: &str) -> ExtractError {
    ConfigError::InvalidChunkSize {
        t_chunk,
        reason: reason.to_string(),
    }
    .into()
}

/// Destination for calibrated blocks of the voltage cube.
pub trait VoltageSink {
    /// Store `block`, shaped `(grid_x, grid_y, frames)`, starting at frame `t0`.
    fn write_block(&mut self, t0: u64, block: ArrayView3<'_, f32>) -> Result<(), IoError>;
}

struct OpenOutput {
    file: File,
    voltage: Dataset,
}

pub struct Hdf5Output {
    path: PathBuf,
    partial: PathBuf,
    open: Option<OpenOutput>,
    overwrite: bool,
    committed: bool,
}

impl Hdf5Output {
    /// Create the partial output for `path`, declare `voltage`, and write
    /// `time` and every attribute. `calibration` is only recorded, the blocks
    /// written later must already be calibrated with it.
    pub fn create<P: AsRef<Path>>(
        path: P,
        source: &Path,
        metadata: &RecordingMetadata,
        calibration: &CalibrationTransform,
        layout: &OutputLayout,
        overwrite: bool,
    ) -> Result<Self, OutputError> {
        let path = path.as_ref().to_path_buf();
        if !overwrite && path.exists() {
            return Err(OutputError::AlreadyExists(path));
        }
        let partial = partial_path(&path);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .map_err(|err| classify_io(&partial, err))?;

        // From here on, dropping `output` cleans up the partial file.
        let mut output = Self {
            path,
            partial,
            open: None,
            overwrite,
            committed: false,
        };
        let open = output
            .init(source, metadata, calibration, layout)
            .map_err(|err| classify_hdf5(&output.partial, err))?;
        output.open = Some(open);
        debug!(
            "Created {} (voltage {:?}, chunk {:?}, {:?})",
            output.partial.display(),
            layout.shape,
            layout.chunk,
            layout.compression
        );
        Ok(output)
    }

    fn init(
        &self,
        source: &Path,
        metadata: &RecordingMetadata,
        calibration: &CalibrationTransform,
        layout: &OutputLayout,
    ) -> hdf5::Result<OpenOutput> {
        let file = File::create(&self.partial)?;

        let [gx, gy, nt] = layout.shape;
        let mut builder = file.new_dataset::<f32>().shape((gx, gy, nt));
        if let Some(chunk) = layout.chunk {
            builder = builder.chunk(chunk);
            builder = match layout.compression {
                Compression::None => builder,
                Compression::Gzip => builder.deflate(DEFAULT_GZIP_LEVEL),
                Compression::Lzf => builder.lzf(),
            };
        }
        let voltage = builder.create(VOLTAGE)?;
        write_voltage_attrs(&voltage, metadata, calibration)?;

        write_time(&file, nt, metadata)?;

        let source_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        set_attr_str(&file, "source", &source_name)?;
        set_attr_str(&file, "software", SOFTWARE)?;
        set_attr_str(&file, "software_version", SOFTWARE_VERSION)?;
        set_attr_str(&file, "file_identifier", &Uuid::new_v4().to_string())?;

        Ok(OpenOutput { file, voltage })
    }

    /// Where the output lives until it is committed.
    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    /// Flush and close the file, then move it onto its destination.
    ///
    /// Without `overwrite`, a destination created by someone else while the
    /// output was being written is left alone and `AlreadyExists` returned.
    pub fn commit(mut self) -> Result<PathBuf, OutputError> {
        if let Some(OpenOutput { file, voltage }) = self.open.take() {
            file.flush()
                .map_err(|err| classify_hdf5(&self.partial, err))?;
            drop(voltage);
            file.close()
                .map_err(|err| classify_hdf5(&self.partial, err))?;
        }
        let commit_err = |source| OutputError::Commit {
            from: self.partial.clone(),
            to: self.path.clone(),
            source,
        };
        if self.overwrite {
            fs::rename(&self.partial, &self.path).map_err(commit_err)?;
            self.committed = true;
        } else {
            // Linking never replaces an existing file, unlike rename.
            fs::hard_link(&self.partial, &self.path).map_err(|err| {
                if err.kind() == io::ErrorKind::AlreadyExists {
                    OutputError::AlreadyExists(self.path.clone())
                } else {
                    commit_err(err)
                }
            })?;
            self.committed = true;
            if let Err(err) = fs::remove_file(&self.partial) {
                warn!(
                    "Failed to remove partial output {}: {err}",
                    self.partial.display()
                );
            }
        }
        Ok(self.path.clone())
    }
}

impl VoltageSink for Hdf5Output {
    fn write_block(&mut self, t0: u64, block: ArrayView3<'_, f32>) -> Result<(), IoError> {
        let write_err = |source| IoError::Write {
            dataset: VOLTAGE,
            offset: t0,
            source,
        };
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| write_err(hdf5::Error::from("output already closed".to_string())))?;
        let start = usize::try_from(t0).map_err(|_| IoError::RangeOverflow { t0, t1: t0 })?;
        let end = start + block.shape()[2];

        let block = block.as_standard_layout();
        open.voltage
            .write_slice(block.view(), s![.., .., start..end])
            .map_err(write_err)
    }
}

impl Drop for Hdf5Output {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close every handle before unlinking.
        drop(self.open.take());
        if let Err(err) = fs::remove_file(&self.partial) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove partial output {}: {err}",
                    self.partial.display()
                );
            }
        }
    }
}

/// `dir/.name.<uuid>.partial`, next to `path` so the final rename stays on
/// one filesystem.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let partial = format!(".{name}.{}.partial", Uuid::new_v4());
    match path.parent() {
        Some(dir) => dir.join(partial),
        None => PathBuf::from(partial),
    }
}

fn classify_io(path: &Path, err: io::Error) -> OutputError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => OutputError::PermissionDenied {
            path: path.to_path_buf(),
            source: err,
        },
        io::ErrorKind::StorageFull => OutputError::DiskFull {
            path: path.to_path_buf(),
        },
        _ => OutputError::Create {
            path: path.to_path_buf(),
            source: hdf5::Error::from(err.to_string()),
        },
    }
}

// HDF5 only reports the OS error as text.
fn classify_hdf5(path: &Path, err: hdf5::Error) -> OutputError {
    let message = err.to_string();
    if message.contains("No space left on device") {
        OutputError::DiskFull {
            path: path.to_path_buf(),
        }
    } else if message.contains("Permission denied") {
        OutputError::PermissionDenied {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, message),
        }
    } else {
        OutputError::Create {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

fn write_voltage_attrs(
    voltage: &Dataset,
    metadata: &RecordingMetadata,
    calibration: &CalibrationTransform,
) -> hdf5::Result<()> {
    set_attr_str(voltage, "units", "uV")?;
    set_attr_f64(voltage, "sampling_rate", metadata.sample_rate_hz)?;
    set_attr_str(voltage, "dim1", "Electrode in x dimension")?;
    set_attr_str(voltage, "dim2", "Electrode in y dimension")?;
    set_attr_str(voltage, "dim3", "Time")?;
    set_attr_f64(voltage, "calibration_offset", calibration.offset())?;
    set_attr_f64(voltage, "calibration_scale", calibration.scale())?;
    Ok(())
}

/// `time[i] = i * dt`, written a block at a time.
fn write_time(file: &File, frames: usize, metadata: &RecordingMetadata) -> hdf5::Result<()> {
    let time = file.new_dataset::<f64>().shape(frames).create(TIME)?;
    set_attr_str(&time, "units", "seconds")?;
    set_attr_f64(&time, "sampling_rate", metadata.sample_rate_hz)?;

    let dt = metadata.dt();
    for start in (0..frames).step_by(TIME_BLOCK_LEN) {
        let end = (start + TIME_BLOCK_LEN).min(frames);
        let block = Array1::from_iter((start..end).map(|i| i as f64 * dt));
        time.write_slice(&block, s![start..end])?;
    }
    Ok(())
}

fn set_attr_str(location: &Location, name: &str, value: &str) -> hdf5::Result<()> {
    let value = VarLenUnicode::from_str(value).map_err(|err| hdf5::Error::from(err.to_string()))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_f64(location: &Location, name: &str, value: f64) -> hdf5::Result<()> {
    location
        .new_attr::<f64>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}
