//! Recording variables and the raw-to-voltage calibration derived from them.
use crate::{error::DecodeError, fields, RawSample};

/// Recording variables read from the BRW header.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingMetadata {
    /// Number of time samples per electrode
    pub frame_count: u64,
    /// Electrode grid rows
    pub grid_x: u32,
    /// Electrode grid columns
    pub grid_y: u32,
    pub sample_rate_hz: f64,
    pub signal_inversion: f64,
    /// Lower end of the ADC range, in microvolts
    pub v_min: f64,
    /// Upper end of the ADC range, in microvolts
    pub v_max: f64,
    pub bit_depth: u32,
    /// Number of elements in the raw sample stream
    pub raw_len: u64,
}

impl RecordingMetadata {
    pub fn channel_count(&self) -> u64 {
        u64::from(self.grid_x) * u64::from(self.grid_y)
    }

    /// Sampling period in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }

    pub fn duration_s(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate_hz
    }

    /// Number of quantization levels, `2^bit_depth`
    pub fn levels(&self) -> f64 {
        quantization_levels(self.bit_depth)
    }

    pub fn calibration(&self) -> CalibrationTransform {
        CalibrationTransform::from_metadata(self)
    }

    /// Check the recording variables are usable and that the raw stream holds
    /// exactly `frame_count` frames of `grid_x * grid_y` channels.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.frame_count == 0 {
            return Err(invalid(fields::FRAME_COUNT, "recording has no frames"));
        }
        if self.grid_x == 0 {
            return Err(invalid(fields::GRID_ROWS, "grid has no rows"));
        }
        if self.grid_y == 0 {
            return Err(invalid(fields::GRID_COLS, "grid has no columns"));
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(invalid(
                fields::SAMPLING_RATE,
                format!("{} Hz is not a positive rate", self.sample_rate_hz),
            ));
        }
        if !(1..=RawSample::BITS).contains(&self.bit_depth) {
            return Err(invalid(
                fields::BIT_DEPTH,
                format!(
                    "{} bits does not fit a {}-bit sample",
                    self.bit_depth,
                    RawSample::BITS
                ),
            ));
        }
        for (field, value) in [
            (fields::SIGNAL_INVERSION, self.signal_inversion),
            (fields::MIN_VOLT, self.v_min),
            (fields::MAX_VOLT, self.v_max),
        ] {
            if !value.is_finite() {
                return Err(invalid(field, format!("{value} is not finite")));
            }
        }
        if self.v_max <= self.v_min {
            return Err(invalid(
                fields::MAX_VOLT,
                format!("{} is not above MinVolt {}", self.v_max, self.v_min),
            ));
        }
        self.check_shape()
    }

    fn check_shape(&self) -> Result<(), DecodeError> {
        let channels = self.channel_count();
        let mismatch = || DecodeError::ShapeMismatch {
            raw_len: self.raw_len,
            frame_count: self.frame_count,
            channels,
        };
        if self.raw_len % channels != 0 {
            return Err(mismatch());
        }
        match self.frame_count.checked_mul(channels) {
            Some(total) if total == self.raw_len => Ok(()),
            _ => Err(mismatch()),
        }
    }
}

fn quantization_levels(bit_depth: u32) -> f64 {
    2f64.powi(bit_depth as i32)
}

fn invalid<S: Into<String>>(field: &'static str, reason: S) -> DecodeError {
    DecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Affine map from a digitized level to microvolts.
///
/// `voltage = (raw + offset) * scale` with `offset = -levels / 2` and
/// `scale = signal_inversion * (v_max - v_min) / levels`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    offset: f64,
    scale: f64,
}

impl CalibrationTransform {
    pub fn new(signal_inversion: f64, v_min: f64, v_max: f64, bit_depth: u32) -> Self {
        Self::with_levels(signal_inversion, v_min, v_max, quantization_levels(bit_depth))
    }

    pub fn from_metadata(metadata: &RecordingMetadata) -> Self {
        Self::with_levels(
            metadata.signal_inversion,
            metadata.v_min,
            metadata.v_max,
            metadata.levels(),
        )
    }

    fn with_levels(signal_inversion: f64, v_min: f64, v_max: f64, levels: f64) -> Self {
        Self {
            offset: -levels / 2.0,
            scale: signal_inversion * (v_max - v_min) / levels,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Convert one raw sample into microvolts.
    #[inline]
    pub fn apply(&self, raw: RawSample) -> f32 {
        ((f64::from(raw) + self.offset) * self.scale) as f32
    }
}
