//! Writing small recordings in the BRW layout.
//!
//! Only the datasets `BrwFile` reads are produced, which is enough for tests
//! and demos but not for other BRW consumers.
use std::path::Path;

use hdf5::{File, Group, H5Type};

use crate::{fields, RawSample, RecordingMetadata};

pub struct SyntheticRecording<'a> {
    metadata: RecordingMetadata,
    raw: &'a [RawSample],
    frame_count: i64,
    omitted: Vec<&'static str>,
}

impl<'a> SyntheticRecording<'a> {
    /// `metadata.raw_len` is ignored, the raw stream is written as given.
    pub fn new(metadata: RecordingMetadata, raw: &'a [RawSample]) -> Self {
        let frame_count = i64::try_from(metadata.frame_count).unwrap_or(i64::MAX);
        Self {
            metadata,
            raw,
            frame_count,
            omitted: Vec::new(),
        }
    }

    /// Leave one of the [`fields`] out of the file.
    pub fn without_field(mut self, field: &'static str) -> Self {
        self.omitted.push(field);
        self
    }

    /// Store a frame count that `RecordingMetadata` cannot represent.
    pub fn with_frame_count(mut self, frame_count: i64) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> hdf5::Result<()> {
        let file = File::create(path)?;
        let m = &self.metadata;
        let bit_depth = u8::try_from(m.bit_depth).unwrap_or(u8::MAX);

        self.write_scalar(&file, fields::FRAME_COUNT, self.frame_count)?;
        self.write_scalar(&file, fields::SAMPLING_RATE, m.sample_rate_hz)?;
        self.write_scalar(&file, fields::SIGNAL_INVERSION, m.signal_inversion)?;
        self.write_scalar(&file, fields::MAX_VOLT, m.v_max)?;
        self.write_scalar(&file, fields::MIN_VOLT, m.v_min)?;
        self.write_scalar(&file, fields::BIT_DEPTH, bit_depth)?;
        self.write_scalar(&file, fields::GRID_ROWS, m.grid_x as i32)?;
        self.write_scalar(&file, fields::GRID_COLS, m.grid_y as i32)?;

        if !self.omitted.contains(&fields::RAW) {
            let (group, name) = split_path(fields::RAW);
            ensure_group(&file, group)?
                .new_dataset::<RawSample>()
                .shape(self.raw.len())
                .create(name)?
                .write(self.raw)?;
        }
        Ok(())
    }

    fn write_scalar<T: H5Type>(&self, file: &File, field: &'static str, value: T) -> hdf5::Result<()> {
        if self.omitted.contains(&field) {
            return Ok(());
        }
        let (group, name) = split_path(field);
        ensure_group(file, group)?
            .new_dataset::<T>()
            .shape(1)
            .create(name)?
            .write(&[value])?;
        Ok(())
    }
}

fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Open the group at `path`, creating any missing level on the way.
fn ensure_group(file: &File, path: &str) -> hdf5::Result<Group> {
    let mut group = file.group("/")?;
    for name in path.split('/').filter(|name| !name.is_empty()) {
        group = match group.group(name) {
            Ok(existing) => existing,
            Err(_) => group.create_group(name)?,
        };
    }
    Ok(group)
}
