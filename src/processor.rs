//! Streaming chunks from the raw stream into the voltage cube.
//!
//! Every chunk is read in decode order `(t, x, y)`, viewed in storage order
//! `(x, y, t)` and calibrated into a single standard-layout `f32` block before
//! it is written. Only the raw buffer and the calibrated block of a chunk are
//! alive at once in sequential mode.
use std::{
    thread,
    time::{Duration, Instant},
};

use brw_format::{CalibrationTransform, RawSample, RecordingMetadata};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;
use ndarray::{Array3, ArrayView3, ShapeError, Zip};

use crate::{
    error::{panic_message, ConfigError, ExtractError, IoError},
    output::VoltageSink,
    plan::{ChunkPlan, ChunkSpan},
    progress::{ProgressEvent, ProgressObserver},
    source::SampleSource,
};

/// Reshape `raw`, holding `frames` frames of a `grid_x` by `grid_y` grid in
/// decode order, into a calibrated `(grid_x, grid_y, frames)` block.
pub fn calibrate_block(
    raw: &[RawSample],
    frames: usize,
    grid_x: usize,
    grid_y: usize,
    calibration: &CalibrationTransform,
) -> Result<Array3<f32>, ShapeError> {
    let decoded = ArrayView3::from_shape((frames, grid_x, grid_y), raw)?;
    let storage = decoded.permuted_axes([1, 2, 0]);

    let mut block = Array3::<f32>::zeros((grid_x, grid_y, frames));
    Zip::from(&mut block)
        .and(&storage)
        .for_each(|voltage, &raw| *voltage = calibration.apply(raw));
    Ok(block)
}

/// Grid geometry and calibration shared by every chunk of one recording.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    grid_x: usize,
    grid_y: usize,
    channels: u64,
    calibration: CalibrationTransform,
}

impl Geometry {
    fn new(metadata: &RecordingMetadata, calibration: &CalibrationTransform) -> Self {
        Self {
            grid_x: metadata.grid_x as usize,
            grid_y: metadata.grid_y as usize,
            channels: metadata.channel_count(),
            calibration: *calibration,
        }
    }

    fn calibrate(&self, span: ChunkSpan, raw: &[RawSample]) -> Result<Array3<f32>, IoError> {
        let frames = usize::try_from(span.len()).map_err(|_| IoError::RangeOverflow {
            t0: span.t0,
            t1: span.t1,
        })?;
        calibrate_block(raw, frames, self.grid_x, self.grid_y, &self.calibration).map_err(
            |source| IoError::BlockShape {
                t0: span.t0,
                t1: span.t1,
                source,
            },
        )
    }
}

/// Read exactly the raw elements of `span`.
fn read_span<S: SampleSource>(
    source: &S,
    span: ChunkSpan,
    channels: u64,
) -> Result<Vec<RawSample>, IoError> {
    let range = span.sample_range(channels).ok_or(IoError::RangeOverflow {
        t0: span.t0,
        t1: span.t1,
    })?;
    let expected = range.end - range.start;
    let raw = source.read_samples(range)?;
    if raw.len() as u64 != expected {
        return Err(IoError::TruncatedRead {
            t0: span.t0,
            expected,
            actual: raw.len() as u64,
        });
    }
    Ok(raw)
}

/// Tracks completed chunks and reports them to the observer.
struct Progress<'o, O> {
    observer: &'o mut O,
    done: u64,
    total: u64,
    last: Instant,
}

impl<'o, O: ProgressObserver> Progress<'o, O> {
    fn new(observer: &'o mut O, total: u64) -> Self {
        Self {
            observer,
            done: 0,
            total,
            last: Instant::now(),
        }
    }

    fn chunk_written(&mut self, span: ChunkSpan) {
        let now = Instant::now();
        let elapsed: Duration = now - self.last;
        self.last = now;
        self.done += 1;
        debug!(
            "Wrote chunk {}/{} (frames {}..{}) in {:?}",
            span.index + 1,
            self.total,
            span.t0,
            span.t1,
            elapsed
        );
        self.observer
            .on_progress(&ProgressEvent::new(self.done, self.total, elapsed));
    }
}

/// Process every span in order on the calling thread. Returns the number of
/// chunks written.
pub fn run_sequential<S, W, O>(
    source: &S,
    sink: &mut W,
    plan: &ChunkPlan,
    calibration: &CalibrationTransform,
    observer: &mut O,
) -> Result<u64, ExtractError>
where
    S: SampleSource,
    W: VoltageSink,
    O: ProgressObserver,
{
    let geometry = Geometry::new(source.metadata(), calibration);
    let mut progress = Progress::new(observer, plan.chunk_count());

    for span in plan.spans() {
        if span.is_empty() {
            continue;
        }
        let raw = read_span(source, span, geometry.channels)?;
        let block = geometry.calibrate(span, &raw)?;
        drop(raw);
        sink.write_block(span.t0, block.view())?;
        progress.chunk_written(span);
    }
    Ok(progress.done)
}

struct Job {
    span: ChunkSpan,
    raw: Vec<RawSample>,
}

type Finished = (ChunkSpan, Result<Array3<f32>, IoError>);

/// Calibrate chunks on `workers` threads.
///
/// The calling thread alone reads the source and writes the sink, so neither
/// has to be shared. Chunks may finish out of order; each is written at its
/// own offset.
pub fn run_pool<S, W, O>(
    source: &S,
    sink: &mut W,
    plan: &ChunkPlan,
    calibration: &CalibrationTransform,
    workers: usize,
    observer: &mut O,
) -> Result<u64, ExtractError>
where
    S: SampleSource,
    W: VoltageSink,
    O: ProgressObserver,
{
    let geometry = Geometry::new(source.metadata(), calibration);
    run_pool_with(source, sink, plan, geometry.channels, workers, observer, |span, raw| {
        geometry.calibrate(span, raw)
    })
}

/// Worker pool around an arbitrary per-chunk step.
fn run_pool_with<S, W, O, F>(
    source: &S,
    sink: &mut W,
    plan: &ChunkPlan,
    channels: u64,
    workers: usize,
    observer: &mut O,
    calibrate: F,
) -> Result<u64, ExtractError>
where
    S: SampleSource,
    W: VoltageSink,
    O: ProgressObserver,
    F: Fn(ChunkSpan, &[RawSample]) -> Result<Array3<f32>, IoError> + Sync,
{
    if workers == 0 {
        return Err(ConfigError::NoWorkers.into());
    }
    let (job_tx, job_rx) = bounded::<Job>(workers);
    let (done_tx, done_rx) = bounded::<Finished>(workers);
    let calibrate = &calibrate;

    thread::scope(|scope| {
        let handles = (0..workers)
            .map(|_| {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for Job { span, raw } in job_rx {
                        let block = calibrate(span, &raw);
                        drop(raw);
                        if done_tx.send((span, block)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        drop(job_rx);
        drop(done_tx);

        // Both channel ends are dropped when this returns, which lets the
        // workers exit even on error.
        let result = feed(source, sink, plan, channels, job_tx, done_rx, observer);

        let mut panicked = None;
        for handle in handles {
            if let Err(payload) = handle.join() {
                panicked.get_or_insert_with(|| panic_message(&*payload));
            }
        }
        match panicked {
            Some(message) => Err(ExtractError::WorkerPanicked(message)),
            None => result,
        }
    })
}

fn feed<S, W, O>(
    source: &S,
    sink: &mut W,
    plan: &ChunkPlan,
    channels: u64,
    job_tx: Sender<Job>,
    done_rx: Receiver<Finished>,
    observer: &mut O,
) -> Result<u64, ExtractError>
where
    S: SampleSource,
    W: VoltageSink,
    O: ProgressObserver,
{
    let mut progress = Progress::new(observer, plan.chunk_count());
    let mut pending = 0u64;
    let workers_gone = || ExtractError::WorkerPanicked("worker channel closed".to_string());

    let mut write = |(span, block): Finished, progress: &mut Progress<'_, O>| {
        sink.write_block(span.t0, block?.view())?;
        progress.chunk_written(span);
        Ok::<_, ExtractError>(())
    };

    for span in plan.spans() {
        if span.is_empty() {
            continue;
        }
        let mut job = Job {
            raw: read_span(source, span, channels)?,
            span,
        };
        loop {
            match job_tx.try_send(job) {
                Ok(()) => {
                    pending += 1;
                    break;
                }
                Err(TrySendError::Full(returned)) => {
                    job = returned;
                    let finished = done_rx.recv().map_err(|_| workers_gone())?;
                    pending -= 1;
                    write(finished, &mut progress)?;
                }
                Err(TrySendError::Disconnected(_)) => return Err(workers_gone()),
            }
        }
    }
    drop(job_tx);

    while pending > 0 {
        let finished = done_rx.recv().map_err(|_| workers_gone())?;
        pending -= 1;
        write(finished, &mut progress)?;
    }
    Ok(progress.done)
}

#[cfg(test)]
mod test {
    use ndarray::s;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{progress::NoProgress, source::MemorySource};

    impl VoltageSink for Array3<f32> {
        fn write_block(&mut self, t0: u64, block: ArrayView3<'_, f32>) -> Result<(), IoError> {
            let t0 = t0 as usize;
            let t1 = t0 + block.shape()[2];
            self.slice_mut(s![.., .., t0..t1]).assign(&block);
            Ok(())
        }
    }

    fn ramp_source(frame_count: u64, grid_x: u32, grid_y: u32) -> MemorySource {
        let len = frame_count * u64::from(grid_x) * u64::from(grid_y);
        let raw = (0..len).map(|i| (i % 4096) as RawSample).collect();
        MemorySource::new(frame_count, grid_x, grid_y, raw)
    }

    fn empty_cube(source: &MemorySource) -> Array3<f32> {
        let m = &source.metadata;
        Array3::zeros((m.grid_x as usize, m.grid_y as usize, m.frame_count as usize))
    }

    #[test]
    fn test_axis_permutation() -> eyre::Result<()> {
        // 2 frames of a 2x3 grid in (t, x, y) order
        let raw = (0..12).collect::<Vec<RawSample>>();
        let calibration = CalibrationTransform::new(1.0, -4096.0, 4096.0, 12);
        let block = calibrate_block(&raw, 2, 2, 3, &calibration)?;

        assert_eq!(block.shape(), &[2, 3, 2]);
        assert!(block.is_standard_layout());
        for t in 0..2 {
            for x in 0..2 {
                for y in 0..3 {
                    let expected = calibration.apply(raw[t * 6 + x * 3 + y]);
                    assert_eq!(block[[x, y, t]], expected);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_calibrated_values() -> eyre::Result<()> {
        let calibration = CalibrationTransform::new(1.0, -4096.0, 4096.0, 12);
        let block = calibrate_block(&[2048, 2049, 0, 4095], 4, 1, 1, &calibration)?;
        assert_eq!(block.into_raw_vec_and_offset().0, vec![0.0, 2.0, -4096.0, 4094.0]);
        Ok(())
    }

    #[test]
    fn test_wrong_length_is_shape_error() {
        let calibration = CalibrationTransform::new(1.0, -1.0, 1.0, 12);
        assert!(calibrate_block(&[0; 5], 1, 2, 3, &calibration).is_err());

        let source = ramp_source(4, 2, 3);
        let geometry = Geometry::new(&source.metadata, &calibration);
        let span = ChunkSpan { index: 0, t0: 0, t1: 1 };
        assert!(matches!(
            geometry.calibrate(span, &[0; 5]),
            Err(IoError::BlockShape { t0: 0, t1: 1, .. })
        ));
    }

    #[test]
    fn test_uses_given_calibration() -> eyre::Result<()> {
        let source = ramp_source(6, 1, 2);
        let plan = ChunkPlan::with_step(6, 4);
        // Differs from what the header would give
        let calibration = CalibrationTransform::new(-1.0, 0.0, 10.0, 2);

        let mut cube = empty_cube(&source);
        run_sequential(&source, &mut cube, &plan, &calibration, &mut NoProgress)?;
        let expected = calibrate_block(&source.raw, 6, 1, 2, &calibration)?;
        assert_eq!(cube, expected);

        let mut pooled = empty_cube(&source);
        run_pool(&source, &mut pooled, &plan, &calibration, 2, &mut NoProgress)?;
        assert_eq!(pooled, expected);
        Ok(())
    }

    #[test]
    fn test_sequential() -> eyre::Result<()> {
        let source = ramp_source(25, 2, 3);
        let calibration = source.metadata.calibration();
        let plan = ChunkPlan::new(25, 10.0, 1.0)?;
        let mut cube = empty_cube(&source);
        let mut events = Vec::new();
        let mut observer = |event: &ProgressEvent| events.push(*event);

        let written = run_sequential(&source, &mut cube, &plan, &calibration, &mut observer)?;
        assert_eq!(written, 3);

        let expected = calibrate_block(&source.raw, 25, 2, 3, &calibration)?;
        assert_eq!(cube, expected);

        assert_eq!(
            events.iter().map(|e| e.chunks_done).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(events.last().unwrap().fraction, 1.0);
        assert_eq!(events.last().unwrap().estimated_time_remaining, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn test_pool_matches_sequential() -> eyre::Result<()> {
        let source = ramp_source(103, 4, 4);
        let calibration = source.metadata.calibration();
        let plan = ChunkPlan::with_step(103, 7);

        let mut sequential = empty_cube(&source);
        run_sequential(&source, &mut sequential, &plan, &calibration, &mut NoProgress)?;

        for workers in [1, 2, 5] {
            let mut pooled = empty_cube(&source);
            let mut done = 0;
            let mut observer = |event: &ProgressEvent| done = event.chunks_done;
            let written = run_pool(&source, &mut pooled, &plan, &calibration, workers, &mut observer)?;
            assert_eq!(written, plan.chunk_count());
            assert_eq!(done, plan.chunk_count());
            assert_eq!(pooled, sequential);
        }
        Ok(())
    }

    #[test]
    fn test_pool_worker_panic() {
        let source = ramp_source(40, 2, 2);
        let geometry = Geometry::new(&source.metadata, &source.metadata.calibration());
        let plan = ChunkPlan::with_step(40, 4);

        for workers in [1, 3] {
            let mut cube = empty_cube(&source);
            let result = run_pool_with(
                &source,
                &mut cube,
                &plan,
                geometry.channels,
                workers,
                &mut NoProgress,
                |span, raw| {
                    if span.index == 2 {
                        panic!("calibration blew up on chunk 2");
                    }
                    geometry.calibrate(span, raw)
                },
            );
            match result {
                Err(ExtractError::WorkerPanicked(message)) => {
                    assert!(message.contains("chunk 2"), "{message}")
                }
                other => panic!("expected a worker panic, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_truncated_read() {
        let mut source = ramp_source(10, 2, 2);
        source.raw.truncate(35);
        let calibration = source.metadata.calibration();
        let plan = ChunkPlan::with_step(10, 4);
        let mut cube = empty_cube(&source);

        let err = run_sequential(&source, &mut cube, &plan, &calibration, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Io(IoError::TruncatedRead {
                t0: 8,
                expected: 8,
                actual: 3
            })
        ));

        let err = run_pool(&source, &mut cube, &plan, &calibration, 3, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Io(IoError::TruncatedRead { t0: 8, .. })
        ));
    }

    #[test]
    fn test_empty_plan_writes_nothing() -> eyre::Result<()> {
        let source = ramp_source(0, 2, 2);
        let calibration = source.metadata.calibration();
        let plan = ChunkPlan::new(0, 10.0, 1.0)?;
        let mut cube = empty_cube(&source);
        assert_eq!(
            run_sequential(&source, &mut cube, &plan, &calibration, &mut NoProgress)?,
            0
        );
        assert_eq!(
            run_pool(&source, &mut cube, &plan, &calibration, 2, &mut NoProgress)?,
            0
        );
        Ok(())
    }

    #[test]
    fn test_pool_needs_workers() {
        let source = ramp_source(4, 1, 1);
        let calibration = source.metadata.calibration();
        let plan = ChunkPlan::with_step(4, 1);
        let mut cube = empty_cube(&source);
        assert!(matches!(
            run_pool(&source, &mut cube, &plan, &calibration, 0, &mut NoProgress),
            Err(ExtractError::Config(ConfigError::NoWorkers))
        ));
    }
}
