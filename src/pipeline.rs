//! One recording in, one HDF5 file out.
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use brw_format::BrwFile;
use log::info;

use crate::{
    config::{ExtractJob, ExtractOptions},
    error::{ExtractError, OutputError},
    output::{Hdf5Output, OutputLayout},
    plan::ChunkPlan,
    processor::{run_pool, run_sequential},
    progress::{LogProgress, NoProgress, ProgressObserver},
    source::SampleSource,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSummary {
    /// Committed output file
    pub output: PathBuf,
    pub frames: u64,
    pub chunks: u64,
    pub elapsed: Duration,
}

/// Extract `job.input` into `job.output`, logging progress when
/// `options.verbose` is set.
pub fn extract(job: &ExtractJob, options: &ExtractOptions) -> Result<ExtractSummary, ExtractError> {
    if options.verbose {
        let label = job
            .input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.input.display().to_string());
        extract_with_observer(job, options, &mut LogProgress::new(label))
    } else {
        extract_with_observer(job, options, &mut NoProgress)
    }
}

pub fn extract_with_observer<O: ProgressObserver>(
    job: &ExtractJob,
    options: &ExtractOptions,
    observer: &mut O,
) -> Result<ExtractSummary, ExtractError> {
    let start = Instant::now();
    options.validate()?;
    job.validate()?;
    // Checked before the source is touched; creating the output checks again.
    if !options.overwrite && job.output.exists() {
        return Err(OutputError::AlreadyExists(job.output.clone()).into());
    }

    let source = BrwFile::open(&job.input)?;
    extract_source(&source, job, options, observer, start)
}

/// Everything after the source is open: plan, create, process, commit.
fn extract_source<S, O>(
    source: &S,
    job: &ExtractJob,
    options: &ExtractOptions,
    observer: &mut O,
    start: Instant,
) -> Result<ExtractSummary, ExtractError>
where
    S: SampleSource,
    O: ProgressObserver,
{
    let metadata = source.metadata();
    info!(
        "Extracting {}: {} frames of {}x{} electrodes ({:.1} s at {} Hz)",
        job.input.display(),
        metadata.frame_count,
        metadata.grid_x,
        metadata.grid_y,
        metadata.duration_s(),
        metadata.sample_rate_hz
    );

    let calibration = metadata.calibration();
    let plan = ChunkPlan::new(
        metadata.frame_count,
        metadata.sample_rate_hz,
        options.t_interval_s,
    )?;
    let layout = OutputLayout::new(metadata, &plan, options)?;
    let mut output = Hdf5Output::create(
        &job.output,
        &job.input,
        metadata,
        &calibration,
        &layout,
        options.overwrite,
    )?;

    let chunks = if options.workers > 1 {
        run_pool(source, &mut output, &plan, &calibration, options.workers, observer)?
    } else {
        run_sequential(source, &mut output, &plan, &calibration, observer)?
    };
    let output = output.commit()?;

    let elapsed = start.elapsed();
    info!("Wrote {} in {:.2?}", output.display(), elapsed);
    Ok(ExtractSummary {
        output,
        frames: plan.frame_count(),
        chunks,
        elapsed,
    })
}
