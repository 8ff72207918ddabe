use std::{path::PathBuf, process::ExitCode};

use brw_extract::{
    config::DEFAULT_INTERVAL_S, extract_batch, ChunkPolicy, Compression, ExtractJob,
    ExtractOptions,
};
use pico_args::Arguments;

const HELP: &str = "\
Convert BrainWave (.brw) recordings into calibrated HDF5

USAGE:
  brw-to-hdf5 [OPTIONS] FILE...

OPTIONS:
  --interval S            Seconds of recording per chunk [default: 1]
  --chunk POLICY          matched, none or a frame count [default: matched]
  --compression CODEC     none, gzip or lzf [default: none]
  --overwrite             Replace existing output files
  --workers N             Threads calibrating chunks of one file [default: 1]
  --jobs N                Files converted at once [default: 1]
  --verbose               Log progress of every chunk
  -h, --help              Print this message
";

struct Args {
    options: ExtractOptions,
    jobs: usize,
    inputs: Vec<PathBuf>,
}

fn parse_args() -> eyre::Result<Option<Args>> {
    let mut args = Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        return Ok(None);
    }

    let options = ExtractOptions {
        t_interval_s: args
            .opt_value_from_str("--interval")?
            .unwrap_or(DEFAULT_INTERVAL_S),
        chunk_policy: args
            .opt_value_from_str::<_, ChunkPolicy>("--chunk")?
            .unwrap_or_default(),
        compression: args
            .opt_value_from_str::<_, Compression>("--compression")?
            .unwrap_or_default(),
        overwrite: args.contains("--overwrite"),
        workers: args.opt_value_from_str("--workers")?.unwrap_or(1),
        verbose: args.contains("--verbose"),
    };
    let jobs = args.opt_value_from_str("--jobs")?.unwrap_or(1);
    let inputs = args
        .finish()
        .into_iter()
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    if inputs.is_empty() {
        eyre::bail!("no input files given, see --help");
    }
    Ok(Some(Args {
        options,
        jobs,
        inputs,
    }))
}

fn main() -> eyre::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(args) = parse_args()? else {
        print!("{HELP}");
        return Ok(ExitCode::SUCCESS);
    };
    let jobs = args
        .inputs
        .iter()
        .map(ExtractJob::from_input)
        .collect::<Vec<_>>();

    let report = extract_batch(&jobs, &args.options, args.jobs)?;
    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
