use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use drowse_lib::{
    config::{PipelineConfig, RrUnit, Sd2Degeneracy, SpectralMethod},
    io::{
        results::CsvResultLog,
        samples::{read_samples, SampleSource, SnapshotFileSource},
        text as text_io,
    },
    metrics::hrv::{hrv_nonlinear, hrv_psd, hrv_time, PsdSettings},
    pipeline::HrvPipeline,
    signal::{RRSeries, Timestamp},
};
use log::{error, info};
use serde::Serialize;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

#[derive(Parser)]
#[command(
    name = "drowse",
    version,
    about = "Sliding-window HRV features for drowsiness detection"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SpectralArg {
    Uniform,
    Resampled,
}

impl From<SpectralArg> for SpectralMethod {
    fn from(value: SpectralArg) -> Self {
        match value {
            SpectralArg::Uniform => SpectralMethod::Uniform,
            SpectralArg::Resampled => SpectralMethod::Resampled,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum UnitArg {
    #[value(name = "ms")]
    Milliseconds,
    #[value(name = "s")]
    Seconds,
}

impl From<UnitArg> for RrUnit {
    fn from(value: UnitArg) -> Self {
        match value {
            UnitArg::Milliseconds => RrUnit::Milliseconds,
            UnitArg::Seconds => RrUnit::Seconds,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Sd2Arg {
    Clamp,
    Absent,
}

impl From<Sd2Arg> for Sd2Degeneracy {
    fn from(value: Sd2Arg) -> Self {
        match value {
            Sd2Arg::Clamp => Sd2Degeneracy::Clamp,
            Sd2Arg::Absent => Sd2Degeneracy::Absent,
        }
    }
}

/// Pipeline settings: an optional TOML file, then per-flag overrides.
#[derive(Args, Debug)]
struct PipelineArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    window_size: Option<usize>,
    #[arg(long)]
    stride: Option<usize>,
    #[arg(long)]
    max_error_ratio: Option<f64>,
    #[arg(long)]
    min_frequency_samples: Option<usize>,
    #[arg(long)]
    sampling_rate_hz: Option<f64>,
    #[arg(long)]
    spectral_method: Option<SpectralArg>,
    #[arg(long)]
    rr_unit: Option<UnitArg>,
    #[arg(long)]
    sd2_policy: Option<Sd2Arg>,
}

impl PipelineArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.window_size {
            cfg.window_size = v;
        }
        if let Some(v) = self.stride {
            cfg.stride = v;
        }
        if let Some(v) = self.max_error_ratio {
            cfg.max_error_ratio = v;
        }
        if let Some(v) = self.min_frequency_samples {
            cfg.min_frequency_samples = v;
        }
        if let Some(v) = self.sampling_rate_hz {
            cfg.sampling_rate_hz = v;
        }
        if let Some(v) = self.spectral_method {
            cfg.spectral_method = v.into();
        }
        if let Some(v) = self.rr_unit {
            cfg.rr_unit = v.into();
        }
        if let Some(v) = self.sd2_policy {
            cfg.sd2_degeneracy = v.into();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Time-domain HRV (SDNN, RMSSD) from newline-delimited RR intervals
    HrvTime {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 2)]
        min_samples: usize,
    },
    /// Frequency-domain HRV (Welch PSD, LF/HF)
    HrvPsd {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        fs: f64,
        #[arg(long, default_value_t = 30)]
        min_samples: usize,
        #[arg(long, default_value = "uniform")]
        method: SpectralArg,
        #[arg(long, default_value = "ms")]
        rr_unit: UnitArg,
    },
    /// Nonlinear HRV metrics (Poincaré SD1/SD2)
    HrvNonlinear {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 2)]
        min_samples: usize,
        #[arg(long, default_value = "clamp")]
        sd2_policy: Sd2Arg,
    },
    /// Run the sliding-window pipeline once over a sample export and append rows to a CSV log
    Process {
        #[arg(long)]
        samples: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Poll a sample export and append a row for every newly completed window
    Watch {
        #[arg(long)]
        samples: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many polls (runs until interrupted when omitted)
        #[arg(long)]
        max_polls: Option<usize>,
        #[arg(long, default_value_t = 3)]
        retries: usize,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Print the effective pipeline configuration as TOML
    Config {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Debug, Serialize)]
struct RunSummary {
    samples_read: usize,
    rows_written: usize,
    duplicates_skipped: usize,
    last_timestamp: Option<Timestamp>,
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::HrvTime { input, min_samples } => cmd_hrv_time(input.as_deref(), min_samples)?,
        Commands::HrvPsd {
            input,
            fs,
            min_samples,
            method,
            rr_unit,
        } => {
            let settings = PsdSettings {
                fs,
                min_samples,
                method: method.into(),
                rr_unit: rr_unit.into(),
            };
            cmd_hrv_psd(input.as_deref(), &settings)?
        }
        Commands::HrvNonlinear {
            input,
            min_samples,
            sd2_policy,
        } => cmd_hrv_nonlinear(input.as_deref(), min_samples, sd2_policy.into())?,
        Commands::Process {
            samples,
            out,
            pipeline,
        } => cmd_process(&samples, &out, &pipeline.resolve()?)?,
        Commands::Watch {
            samples,
            out,
            interval_ms,
            max_polls,
            retries,
            pipeline,
        } => cmd_watch(
            &samples,
            &out,
            &pipeline.resolve()?,
            Duration::from_millis(interval_ms),
            max_polls,
            retries,
        )?,
        Commands::Config { pipeline } => {
            print!("{}", toml::to_string(&pipeline.resolve()?)?);
        }
    }
    Ok(())
}

fn read_rr(input: Option<&Path>) -> Result<RRSeries> {
    match input {
        Some(path) => text_io::read_rr_intervals(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_rr_intervals(&buf)
        }
    }
}

fn cmd_hrv_time(input: Option<&Path>, min_samples: usize) -> Result<()> {
    let rr = read_rr(input)?;
    let m = hrv_time(&rr, min_samples);
    println!("{}", serde_json::to_string(&m)?);
    Ok(())
}

fn cmd_hrv_psd(input: Option<&Path>, settings: &PsdSettings) -> Result<()> {
    let rr = read_rr(input)?;
    let psd = hrv_psd(&rr, settings);
    println!("{}", serde_json::to_string(&psd)?);
    Ok(())
}

fn cmd_hrv_nonlinear(
    input: Option<&Path>,
    min_samples: usize,
    policy: Sd2Degeneracy,
) -> Result<()> {
    let rr = read_rr(input)?;
    let nonlinear = hrv_nonlinear(&rr, min_samples, policy);
    println!("{}", serde_json::to_string(&nonlinear)?);
    Ok(())
}

fn cmd_process(samples: &Path, out: &Path, cfg: &PipelineConfig) -> Result<()> {
    let batch = read_samples(samples)?;
    let mut pipeline = HrvPipeline::new(cfg.clone())?;
    let mut log = CsvResultLog::open(out)?;
    let samples_read = batch.len();
    let rows_written = pipeline
        .process_into(batch, &mut log)
        .with_context(|| format!("appending results to {}", out.display()))?;
    info!(
        "processed {} samples from {}, wrote {} rows",
        samples_read,
        samples.display(),
        rows_written
    );
    let summary = RunSummary {
        samples_read,
        rows_written,
        duplicates_skipped: pipeline.skipped(),
        last_timestamp: pipeline.last_timestamp(),
        out: out.to_path_buf(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_watch(
    samples: &Path,
    out: &Path,
    cfg: &PipelineConfig,
    interval: Duration,
    max_polls: Option<usize>,
    retries: usize,
) -> Result<()> {
    let mut source = SnapshotFileSource::new(samples).with_retries(retries, interval / 4);
    let mut pipeline = HrvPipeline::new(cfg.clone())?;
    let mut log = CsvResultLog::open(out)?;
    let mut samples_read = 0;
    let mut polls = 0;
    loop {
        polls += 1;
        match source.fetch() {
            Ok(batch) => {
                let before = pipeline.skipped();
                samples_read += batch.len();
                let written = pipeline.process_into(batch, &mut log)?;
                let repeated = pipeline.skipped() - before;
                if written == 0 {
                    info!("no new windows ({} already seen samples ignored)", repeated);
                } else {
                    info!("wrote {} rows to {}", written, out.display());
                }
            }
            Err(err) => error!("poll {} of {} failed: {:#}", polls, samples.display(), err),
        }
        if max_polls.is_some_and(|max| polls >= max) {
            break;
        }
        thread::sleep(interval);
    }
    let summary = RunSummary {
        samples_read,
        rows_written: log.rows_written(),
        duplicates_skipped: pipeline.skipped(),
        last_timestamp: pipeline.last_timestamp(),
        out: out.to_path_buf(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
