//! Opening a BRW container and streaming its raw samples.
use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use hdf5::{Dataset, File, H5Type};
use log::debug;
use ndarray::s;

use crate::{error::DecodeError, fields, RawSample, RecordingMetadata};

/// An open BRW recording with a validated header.
///
/// The raw stream dataset stays open so chunks can be read one at a time.
pub struct BrwFile {
    path: PathBuf,
    // Owns the container `raw` was opened from.
    _file: File,
    raw: Dataset,
    metadata: RecordingMetadata,
}

impl BrwFile {
    /// Open `path`, read every recording variable and check the raw stream
    /// against them.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| DecodeError::Open {
            path: path.clone(),
            source,
        })?;

        let raw = file
            .dataset(fields::RAW)
            .map_err(|_| DecodeError::MissingField(fields::RAW))?;
        if raw.ndim() != 1 {
            return Err(DecodeError::InvalidField {
                field: fields::RAW,
                reason: format!("expected a flat stream, found shape {:?}", raw.shape()),
            });
        }

        let metadata = RecordingMetadata {
            frame_count: read_count(&file, fields::FRAME_COUNT)?,
            grid_x: read_count(&file, fields::GRID_ROWS)?,
            grid_y: read_count(&file, fields::GRID_COLS)?,
            sample_rate_hz: read_scalar::<f64>(&file, fields::SAMPLING_RATE)?,
            signal_inversion: read_scalar::<f64>(&file, fields::SIGNAL_INVERSION)?,
            v_min: read_scalar::<f64>(&file, fields::MIN_VOLT)?,
            v_max: read_scalar::<f64>(&file, fields::MAX_VOLT)?,
            bit_depth: read_count(&file, fields::BIT_DEPTH)?,
            raw_len: raw.size() as u64,
        };
        metadata.validate()?;
        debug!(
            "Opened {}: {} frames, {}x{} grid at {} Hz",
            path.display(),
            metadata.frame_count,
            metadata.grid_x,
            metadata.grid_y,
            metadata.sample_rate_hz
        );

        Ok(Self {
            path,
            _file: file,
            raw,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    /// Read the raw stream elements in `range`, in decode order.
    pub fn read_samples(&self, range: Range<usize>) -> hdf5::Result<Vec<RawSample>> {
        let samples = self
            .raw
            .read_slice_1d::<RawSample, _>(s![range.start..range.end])?;
        Ok(samples.into_raw_vec_and_offset().0)
    }
}

/// Read the first element of a one-element dataset.
fn read_scalar<T: H5Type + Copy>(file: &File, field: &'static str) -> Result<T, DecodeError> {
    let dataset = file
        .dataset(field)
        .map_err(|_| DecodeError::MissingField(field))?;
    let values = dataset
        .read_raw::<T>()
        .map_err(|source| DecodeError::Read { field, source })?;
    values
        .first()
        .copied()
        .ok_or(DecodeError::MissingField(field))
}

/// Read an integer field and narrow it to the type the metadata uses.
fn read_count<T: TryFrom<i64>>(file: &File, field: &'static str) -> Result<T, DecodeError> {
    let value = read_scalar::<i64>(file, field)?;
    T::try_from(value).map_err(|_| DecodeError::InvalidField {
        field,
        reason: format!("{value} is out of range"),
    })
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::synthetic::SyntheticRecording;

    fn metadata() -> RecordingMetadata {
        RecordingMetadata {
            frame_count: 5,
            grid_x: 2,
            grid_y: 2,
            sample_rate_hz: 1000.0,
            signal_inversion: 1.0,
            v_min: -4125.0,
            v_max: 4125.0,
            bit_depth: 12,
            raw_len: 20,
        }
    }

    #[test]
    fn test_open_reads_header() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        let raw = (0..20).collect::<Vec<RawSample>>();
        SyntheticRecording::new(metadata(), &raw).write(&path)?;

        let brw = BrwFile::open(&path)?;
        assert_eq!(brw.metadata(), &metadata());
        assert_eq!(brw.path(), path.as_path());
        assert_eq!(brw.read_samples(4..8)?, vec![4, 5, 6, 7]);
        Ok(())
    }

    #[test]
    fn test_missing_field() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        let raw = vec![0; 20];
        SyntheticRecording::new(metadata(), &raw)
            .without_field(fields::BIT_DEPTH)
            .write(&path)?;

        assert!(matches!(
            BrwFile::open(&path),
            Err(DecodeError::MissingField(fields::BIT_DEPTH))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_raw_stream() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        SyntheticRecording::new(metadata(), &[])
            .without_field(fields::RAW)
            .write(&path)?;

        assert!(matches!(
            BrwFile::open(&path),
            Err(DecodeError::MissingField(fields::RAW))
        ));
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        let raw = vec![0; 21];
        SyntheticRecording::new(metadata(), &raw).write(&path)?;

        assert!(matches!(
            BrwFile::open(&path),
            Err(DecodeError::ShapeMismatch { raw_len: 21, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_negative_frame_count() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        SyntheticRecording::new(metadata(), &[0; 20])
            .with_frame_count(-5)
            .write(&path)?;

        assert!(matches!(
            BrwFile::open(&path),
            Err(DecodeError::InvalidField {
                field: fields::FRAME_COUNT,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_not_hdf5() -> eyre::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rec.brw");
        std::fs::write(&path, b"definitely not a recording")?;
        assert!(matches!(
            BrwFile::open(&path),
            Err(DecodeError::Open { .. })
        ));
        Ok(())
    }
}
