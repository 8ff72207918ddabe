//! Running many extractions side by side.
use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::unbounded;
use log::{error, info};

use crate::{
    config::{ExtractJob, ExtractOptions},
    error::{panic_message, ConfigError, ExtractError},
    pipeline::{extract, ExtractSummary},
};

/// Result of one job of a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub job: ExtractJob,
    pub result: Result<ExtractSummary, ExtractError>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// One outcome per job, in the order the jobs were given
    pub outcomes: Vec<FileOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ExtractJob, &ExtractError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (&outcome.job, err)))
    }

    pub fn log_summary(&self) {
        for (job, err) in self.failures() {
            error!("{}: {err}", job.input.display());
        }
        info!(
            "Processed {} recordings in {:.2?}: {} succeeded, {} failed",
            self.outcomes.len(),
            self.elapsed,
            self.succeeded(),
            self.failed()
        );
    }
}

/// Extract every job with at most `max_parallel` running at once.
///
/// A failing or panicking job only affects its own outcome.
pub fn extract_batch(
    jobs: &[ExtractJob],
    options: &ExtractOptions,
    max_parallel: usize,
) -> Result<BatchReport, ConfigError> {
    options.validate()?;
    if max_parallel == 0 {
        return Err(ConfigError::NoWorkers);
    }
    Ok(run_batch(jobs, max_parallel, |job| extract(job, options)))
}

/// Run `run` over every job on up to `max_parallel` threads.
fn run_batch<F>(jobs: &[ExtractJob], max_parallel: usize, run: F) -> BatchReport
where
    F: Fn(&ExtractJob) -> Result<ExtractSummary, ExtractError> + Sync,
{
    let start = Instant::now();

    let (job_tx, job_rx) = unbounded();
    for indexed in jobs.iter().enumerate() {
        // The receiver is alive, so this cannot fail.
        let _ = job_tx.send(indexed);
    }
    drop(job_tx);
    let (done_tx, done_rx) = unbounded::<(usize, Result<ExtractSummary, ExtractError>)>();
    let run = &run;

    thread::scope(|scope| {
        for _ in 0..max_parallel.min(jobs.len()) {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for (index, job) in job_rx {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| run(job)))
                        .unwrap_or_else(|payload| {
                            Err(ExtractError::WorkerPanicked(panic_message(&*payload)))
                        });
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut results = done_rx.into_iter().collect::<Vec<_>>();
    results.sort_by_key(|(index, _)| *index);
    let outcomes = results
        .into_iter()
        .map(|(index, result)| FileOutcome {
            job: jobs[index].clone(),
            result,
        })
        .collect();

    let report = BatchReport {
        outcomes,
        elapsed: start.elapsed(),
    };
    report.log_summary();
    report
}

#[cfg(test)]
mod test {
    use std::fs;

    use brw_format::{synthetic::SyntheticRecording, RecordingMetadata};
    use tempfile::TempDir;

    use super::*;
    use crate::error::{DecodeError, OutputError};

    fn metadata() -> RecordingMetadata {
        RecordingMetadata {
            frame_count: 12,
            grid_x: 2,
            grid_y: 2,
            sample_rate_hz: 4.0,
            signal_inversion: 1.0,
            v_min: -100.0,
            v_max: 100.0,
            bit_depth: 8,
            raw_len: 48,
        }
    }

    #[test]
    fn test_batch_keeps_failures_and_order() -> eyre::Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new()?;
        let raw = (0..48).collect::<Vec<u16>>();

        let mut jobs = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let input = dir.path().join(format!("{name}.brw"));
            match name {
                // Corrupt header
                "b" => SyntheticRecording::new(metadata(), &raw[..47]).write(&input)?,
                // Not an HDF5 file at all
                "c" => fs::write(&input, b"nope")?,
                _ => SyntheticRecording::new(metadata(), &raw).write(&input)?,
            }
            jobs.push(ExtractJob::from_input(&input));
        }
        fs::write(&jobs[3].output, b"already here")?;

        let report = extract_batch(&jobs, &ExtractOptions::default(), 3)?;
        assert_eq!(
            report.outcomes.iter().map(|o| o.job.clone()).collect::<Vec<_>>(),
            jobs
        );
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 3);
        assert!(!report.is_success());

        let outcomes = &report.outcomes;
        assert_eq!(outcomes[0].result.as_ref().unwrap().chunks, 3);
        assert!(jobs[0].output.exists());
        assert!(matches!(
            outcomes[1].result,
            Err(ExtractError::Decode(DecodeError::ShapeMismatch { .. }))
        ));
        assert!(!jobs[1].output.exists());
        assert!(matches!(
            outcomes[2].result,
            Err(ExtractError::Decode(DecodeError::Open { .. }))
        ));
        assert!(matches!(
            outcomes[3].result,
            Err(ExtractError::Output(OutputError::AlreadyExists(_)))
        ));
        assert_eq!(report.failures().count(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_batch() -> eyre::Result<()> {
        let report = extract_batch(&[], &ExtractOptions::default(), 4)?;
        assert!(report.outcomes.is_empty());
        assert!(report.is_success());
        Ok(())
    }

    #[test]
    fn test_batch_rejects_bad_options() {
        assert!(matches!(
            extract_batch(&[], &ExtractOptions::default(), 0),
            Err(ConfigError::NoWorkers)
        ));
        let options = ExtractOptions {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            extract_batch(&[], &options, 1),
            Err(ConfigError::NoWorkers)
        ));
    }

    #[test]
    fn test_panicking_job_is_isolated() {
        let jobs = ["a.brw", "b.brw", "c.brw"]
            .map(ExtractJob::from_input)
            .to_vec();

        for max_parallel in [1, 3] {
            let report = run_batch(&jobs, max_parallel, |job| {
                if job.input.ends_with("b.brw") {
                    panic!("decoder exploded on {}", job.input.display());
                }
                Ok(ExtractSummary {
                    output: job.output.clone(),
                    frames: 10,
                    chunks: 1,
                    elapsed: Duration::ZERO,
                })
            });

            assert_eq!(report.succeeded(), 2);
            assert_eq!(report.failed(), 1);
            assert_eq!(report.outcomes[0].result.as_ref().unwrap().output, jobs[0].output);
            assert_eq!(report.outcomes[2].result.as_ref().unwrap().output, jobs[2].output);
            match &report.outcomes[1].result {
                Err(ExtractError::WorkerPanicked(message)) => {
                    assert!(message.contains("decoder exploded on b.brw"), "{message}")
                }
                other => panic!("expected a panic outcome, got {other:?}"),
            }
        }
    }
}
