//! NAM-NMM loader.
//!
//! Walks reference times from `--start` to `--stop` in 6-hour steps and
//! loads each run into the data directory:
//! - raw GRIB2 files are downloaded with retries
//! - the wanted fields are cut around the configured point
//! - the assembled dataset is cached as Zarr
//!
//! A run that fails is logged and skipped. Ctrl-C cancels the download in
//! flight and stops the walk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use nam::{LoadOptions, NamConfig, NamError, NamLoader, ReferenceTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "nam-loader")]
#[command(about = "Download and preprocess the NAM-NMM dataset")]
struct Args {
    /// The first reference time, e.g. 2020-03-01T1200
    #[arg(long, value_parser = parse_reftime)]
    start: Option<ReferenceTime>,

    /// The last reference time (default: now)
    #[arg(long, value_parser = parse_reftime)]
    stop: Option<ReferenceTime>,

    /// The number of most recent runs before --stop to process
    #[arg(short = 'n')]
    n: Option<u32>,

    /// Base directory for downloads
    #[arg(env = "NAM_DATA_DIR", default_value = ".")]
    dir: PathBuf,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// YAML configuration file
    #[arg(long, env = "NAM_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated feature codes (default: from configuration)
    #[arg(long, value_delimiter = ',')]
    features: Option<Vec<String>>,

    /// Keep the raw GRIB2 files after assembling
    #[arg(long)]
    keep_raw: bool,

    /// Do not write the assembled dataset to the cache
    #[arg(long)]
    no_save: bool,

    /// Ignore cached datasets and re-download raw files
    #[arg(long)]
    force: bool,
}

fn parse_reftime(s: &str) -> Result<ReferenceTime, String> {
    ReferenceTime::parse(s).map_err(|e| e.to_string())
}

/// Reference times from `start` to `stop` inclusive.
fn plan(
    start: Option<ReferenceTime>,
    stop: Option<ReferenceTime>,
    n: Option<u32>,
    now: ReferenceTime,
) -> Vec<ReferenceTime> {
    let stop = stop.unwrap_or(now);
    let start = match (start, n) {
        (Some(start), _) => start,
        (None, Some(n)) => ReferenceTime::resolve(stop.datetime() - Duration::hours(6 * n as i64)),
        (None, None) => stop,
    };

    let mut runs = Vec::new();
    let mut reftime = start;
    while reftime <= stop {
        runs.push(reftime);
        reftime = reftime.next();
    }
    runs
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);
    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    let config = match &args.config {
        Some(path) => NamConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => NamConfig::default(),
    };
    let config = Arc::new(config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    let options = LoadOptions {
        features: args.features.clone(),
        save_output: !args.no_save,
        keep_raw_files: args.keep_raw,
        force_refresh: args.force,
        ..LoadOptions::default()
    };

    let runs = plan(args.start, args.stop, args.n, ReferenceTime::resolve(Utc::now()));
    info!(
        runs = runs.len(),
        dir = %args.dir.display(),
        "Starting NAM loader"
    );

    let mut loaded = 0usize;
    for reftime in runs {
        if cancel.is_cancelled() {
            break;
        }
        let loader = NamLoader::new(config.clone(), reftime, &args.dir)
            .with_cancellation(cancel.clone());

        match loader.load(&options).await {
            Ok(dataset) => {
                loaded += 1;
                info!(
                    reftime = %reftime,
                    variables = dataset.variables.len(),
                    forecasts = dataset.forecast.len(),
                    cache = %loader.local_cache().display(),
                    "Loaded run"
                );
            }
            Err(NamError::Cancelled) => {
                warn!(reftime = %reftime, "Cancelled");
                break;
            }
            Err(e) => {
                error!(reftime = %reftime, error = %e, "Could not load run");
            }
        }
    }

    info!(loaded = loaded, "NAM loader finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ReferenceTime {
        ReferenceTime::parse(s).unwrap()
    }

    #[test]
    fn test_cli_time_format() {
        assert_eq!(t("2020-03-01T1200"), t("20200301 1200"));
        assert!(parse_reftime("2020-03-01").is_err());
    }

    #[test]
    fn test_plan_start_to_stop() {
        let runs = plan(Some(t("2020-03-01T0000")), Some(t("2020-03-01T1800")), None, t("2020-03-05T0000"));
        assert_eq!(runs.len(), 4);
        assert_eq!(runs[3], t("2020-03-01T1800"));
    }

    #[test]
    fn test_plan_most_recent() {
        let now = t("2020-03-05T0600");
        let runs = plan(None, None, Some(2), now);
        assert_eq!(runs, vec![t("2020-03-04T1800"), t("2020-03-05T0000"), now]);

        assert_eq!(plan(None, None, None, now), vec![now]);
    }

    #[test]
    fn test_plan_empty_when_start_after_stop() {
        let runs = plan(Some(t("2020-03-02T0000")), Some(t("2020-03-01T0000")), None, t("2020-03-05T0000"));
        assert!(runs.is_empty());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "nam-loader",
            "--start",
            "2020-03-01T1200",
            "--features",
            "t,dswrf",
            "--keep-raw",
            "/data/nam",
        ])
        .unwrap();
        assert_eq!(args.start, Some(t("20200301 1200")));
        assert_eq!(args.features, Some(vec!["t".to_string(), "dswrf".to_string()]));
        assert!(args.keep_raw);
        assert!(!args.no_save);
        assert_eq!(args.dir, PathBuf::from("/data/nam"));
    }
}
