mod job;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ffchain::{
    ChainConfig, ChainError, ExecuteOptions, Execution, FfprobeProber, Input, ResourceSample, StreamKind, Supervisor,
};
use humansize::{format_size, DECIMAL};
use log::{info, warn};

use crate::job::JobSpec;

/// Build and supervise ffmpeg commands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job file
    Run {
        /// Job file (JSON or TOML)
        job: PathBuf,

        /// Print the command line without running it
        #[arg(long)]
        dry_run: bool,

        /// Sample CPU and memory usage while ffmpeg runs
        #[arg(long)]
        monitor: bool,

        /// Terminate ffmpeg if it runs longer than this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Run to completion and print ffmpeg's output
        #[arg(long, conflicts_with = "monitor")]
        capture: bool,
    },
    /// Show the streams of a media file
    Probe {
        file: PathBuf,

        /// Print the raw ffprobe stream records
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.format_timestamp_secs().init();

    let cfg = ChainConfig::load_config(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Run {
            job,
            dry_run,
            monitor,
            timeout,
            capture,
        } => {
            let spec = JobSpec::load(&job)?;
            let mut supervisor = Supervisor::from_config(&cfg).context("Failed to locate ffmpeg")?;
            spec.apply(&mut supervisor)
                .with_context(|| format!("Invalid job: {}", job.display()))?;

            if dry_run {
                println!("{}", supervisor.command_line()?);
                return Ok(());
            }

            tokio::spawn(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, terminating FFmpeg processes");
                    Supervisor::terminate_all();
                }
            });

            let options = ExecuteOptions {
                capture_output: capture,
                monitor,
            };
            let timeout = timeout.map(Duration::from_secs);
            tokio::task::spawn_blocking(move || run_job(supervisor, options, timeout))
                .await
                .context("Job task failed")?
        }
        Command::Probe { file, json } => {
            let prober = Arc::new(FfprobeProber::from_option(cfg.ffprobe_bin.clone()));
            let input = Input::new(file, 0).with_prober(prober);
            tokio::task::spawn_blocking(move || print_streams(&input, json))
                .await
                .context("Probe task failed")?
        }
    }
}

/// Execute the job and block until ffmpeg finishes
fn run_job(mut supervisor: Supervisor, options: ExecuteOptions, timeout: Option<Duration>) -> Result<()> {
    info!("Running: {}", supervisor.command_line()?);

    let handle = match supervisor.execute(options)? {
        Execution::Completed(completed) => {
            print!("{}", completed.stdout);
            eprint!("{}", completed.stderr);
            return Ok(());
        }
        Execution::Monitored(handle) => Some(handle),
        Execution::Detached => None,
    };

    let result = supervisor.wait(timeout);
    if let Some(handle) = &handle {
        match summarize(&handle.resource_usage()) {
            Some(summary) => println!("{}", summary),
            None => println!("No resource samples collected"),
        }
    }

    match result {
        Ok(Some(0)) | Ok(None) => {
            info!("FFmpeg finished");
            Ok(())
        }
        Ok(Some(code)) => bail!("FFmpeg exited with code {}", code),
        Err(ChainError::Timeout(limit)) => {
            supervisor.cleanup();
            bail!("FFmpeg did not finish within {:?} and was terminated", limit)
        }
        Err(e) => {
            supervisor.cleanup();
            Err(e.into())
        }
    }
}

/// Peak figures over a run's resource samples
#[derive(Debug, Clone, Copy, PartialEq)]
struct UsageSummary {
    samples: usize,
    duration: Duration,
    peak_cpu: f32,
    peak_rss: u64,
}

impl std::fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Samples: {} over {:.1}s, peak CPU: {:.1}%, peak RSS: {}",
            self.samples,
            self.duration.as_secs_f64(),
            self.peak_cpu,
            format_size(self.peak_rss, DECIMAL)
        )
    }
}

fn summarize(samples: &[ResourceSample]) -> Option<UsageSummary> {
    let last = samples.last()?;
    Some(UsageSummary {
        samples: samples.len(),
        duration: last.elapsed,
        peak_cpu: samples.iter().map(|s| s.cpu_percent).fold(0.0, f32::max),
        peak_rss: samples.iter().map(|s| s.memory_info.rss).max().unwrap_or(0),
    })
}

fn print_streams(input: &Input, json: bool) -> Result<()> {
    let data = input
        .probe()
        .with_context(|| format!("Failed to probe {}", input.path().display()))?;

    if json {
        let records: Vec<&serde_json::Value> = StreamKind::ALL
            .iter()
            .map(|kind| input.streams(*kind))
            .collect::<ffchain::Result<Vec<_>>>()?
            .into_iter()
            .flat_map(|collection| collection.iter().map(|s| &s.raw))
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if let Some(format) = &data.format {
        println!(
            "{} ({}, {}s)",
            input.path().display(),
            format.format_name.as_deref().unwrap_or("unknown"),
            format.duration.as_deref().unwrap_or("?")
        );
    }

    for kind in StreamKind::ALL {
        for stream in input.streams(kind)? {
            println!(
                "  [{}] #{} {} lang={} title={}",
                kind,
                stream.index,
                stream.codec_name,
                stream.language().unwrap_or("-"),
                stream.title().unwrap_or("-")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffchain::MemoryInfo;

    fn sample(ms: u64, cpu: f32, rss: u64) -> ResourceSample {
        ResourceSample {
            elapsed: Duration::from_millis(ms),
            cpu_percent: cpu,
            memory_percent: 1.0,
            memory_info: MemoryInfo { rss, vms: rss * 2 },
        }
    }

    #[test]
    fn test_summarize_peaks() {
        let samples = vec![sample(100, 12.5, 2_000_000), sample(200, 80.0, 1_500_000), sample(300, 40.0, 3_000_000)];
        let summary = summarize(&samples).unwrap();
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.duration, Duration::from_millis(300));
        assert_eq!(summary.peak_cpu, 80.0);
        assert_eq!(summary.peak_rss, 3_000_000);
        assert!(summary.to_string().contains("peak RSS: 3 MB"));
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["ffchain", "--verbose", "run", "job.toml", "--monitor", "--timeout", "30"]);
        assert!(args.verbose);
        match args.command {
            Command::Run { job, monitor, timeout, capture, dry_run } => {
                assert_eq!(job, PathBuf::from("job.toml"));
                assert!(monitor);
                assert_eq!(timeout, Some(30));
                assert!(!capture);
                assert!(!dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_capture_conflicts_with_monitor() {
        assert!(Args::try_parse_from(["ffchain", "run", "job.json", "--capture", "--monitor"]).is_err());
    }
}
