//! CLI entry point for arrival_watch.
//!
//! Provides subcommands for a one-off arrival lookup at a stop, a live
//! refreshing arrivals board, and replaying recorded positions through the
//! stop proximity monitor.

use anyhow::{Context, Result, bail};
use arrival_watch::config::AppConfig;
use arrival_watch::fetch::BasicClient;
use arrival_watch::output::{append_predictions, print_json, print_pretty};
use arrival_watch::proximity::{PositionSample, ProximityMonitor, SampleOutcome};
use arrival_watch::{
    HttpPredictionFeed, PredictionAggregator, PredictionRecord, RefreshEvent, RefreshScheduler,
    StopRequest,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use geo::Point;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "arrival_watch")]
#[command(about = "Real-time bus arrivals and stop proximity", long_about = None)]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(short, long, global = true, env = "ARRIVALS_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch arrival predictions for a stop once
    Predictions {
        #[command(flatten)]
        stop: StopArgs,

        /// How to print the fetched predictions
        #[arg(short, long, value_enum, default_value_t = Format::Log)]
        format: Format,

        /// CSV file to append predictions to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Keep refreshing predictions for a stop with a live countdown
    Watch {
        #[command(flatten)]
        stop: StopArgs,

        /// Number of refreshes to collect (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        refreshes: usize,

        /// CSV file to append each refresh to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Replay recorded position samples against a stop location
    Proximity {
        /// Stop latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Stop longitude
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// CSV with latitude,longitude,horizontal_accuracy,timestamp columns
        #[arg(value_name = "SAMPLES_CSV")]
        samples: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Format {
    /// One structured log line per arrival
    Log,
    /// Pretty-printed JSON array
    Json,
    /// Debug pretty-print
    Pretty,
}

#[derive(clap::Args)]
struct StopArgs {
    /// Agency identifier used by the prediction feed
    #[arg(short, long)]
    agency: String,

    /// Stop identifier
    #[arg(short, long)]
    stop: String,

    /// Route identifier (repeatable)
    #[arg(short, long = "route", value_name = "ROUTE")]
    routes: Vec<String>,
}

impl From<StopArgs> for StopRequest {
    fn from(args: StopArgs) -> Self {
        StopRequest {
            agency: args.agency,
            stop: args.stop,
            routes: args.routes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = init_tracing()?;

    let cli = Cli::parse();
    let config = AppConfig::from_env(cli.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Predictions {
            stop,
            format,
            output,
        } => {
            fetch_once(&config, stop.into(), format, output.as_deref()).await?;
        }
        Commands::Watch {
            stop,
            refreshes,
            output,
        } => {
            watch(&config, stop.into(), refreshes, output.as_deref()).await?;
        }
        Commands::Proximity { lat, lon, samples } => {
            replay_positions(&config, Point::new(lon, lat), &samples)?;
        }
    }

    Ok(())
}

/// Colored stderr plus a JSON daily-rolling log file.
fn init_tracing() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/arrival_watch.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("arrival_watch.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(guard)
}

fn build_aggregator(
    config: &AppConfig,
) -> Result<PredictionAggregator<HttpPredictionFeed<BasicClient>>> {
    let client = BasicClient::new(config.feed.request_timeout(), config.feed.connect_timeout())
        .context("failed to build HTTP client")?;
    let feed = HttpPredictionFeed::new(client, config.feed.base_url.clone());
    Ok(PredictionAggregator::new(Arc::new(feed)))
}

fn log_predictions(predictions: &[PredictionRecord]) {
    let now = Utc::now();
    for p in predictions {
        info!(
            route = %p.route,
            destination = %p.destination,
            minutes = p.minutes_until_arrival,
            seconds = p.seconds_until_arrival,
            arrival = %p.arrival_time,
            now = p.is_arriving_now(),
            near = p.is_near_future(now),
            "Arrival"
        );
    }
}

#[tracing::instrument(skip(config, output), fields(stop = %request.stop, agency = %request.agency))]
async fn fetch_once(
    config: &AppConfig,
    request: StopRequest,
    format: Format,
    output: Option<&str>,
) -> Result<()> {
    let aggregator = build_aggregator(config)?;

    let (tx, rx) = oneshot::channel();
    aggregator
        .fetch_predictions(&request.stop, &request.routes, &request.agency, move |result| {
            let _ = tx.send(result);
        })
        .context("a fetch is already in flight")?;

    let predictions = rx
        .await
        .context("aggregation ended without a result")?
        .context("failed to fetch predictions")?;

    info!(count = predictions.len(), "Predictions fetched");
    match format {
        Format::Log => log_predictions(&predictions),
        Format::Json => print_json(&predictions)?,
        Format::Pretty => print_pretty(&predictions),
    }

    if let Some(path) = output {
        append_predictions(path, &request.stop, Utc::now(), &predictions)?;
    }

    Ok(())
}

#[tracing::instrument(skip(config, output), fields(stop = %request.stop, agency = %request.agency))]
async fn watch(
    config: &AppConfig,
    request: StopRequest,
    refreshes: usize,
    output: Option<&str>,
) -> Result<()> {
    let aggregator = build_aggregator(config)?;
    let stop = request.stop.clone();
    let mut scheduler = RefreshScheduler::new(aggregator, request, &config.refresh);

    if refreshes == 0 {
        info!("Watching arrivals. Press Ctrl+C to stop.");
    } else {
        info!(refreshes, "Watching arrivals");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    scheduler.resume();
    let mut completed = 0;

    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            event = scheduler.next_event() => event,
        };

        match event {
            Some(RefreshEvent::Countdown(Some(seconds))) => debug!(seconds, "Next refresh"),
            Some(RefreshEvent::Countdown(None)) => debug!("Refreshing"),
            Some(RefreshEvent::Updated(Ok(predictions))) => {
                completed += 1;
                info!(count = predictions.len(), "Arrivals refreshed");
                log_predictions(&predictions);
                if let Some(path) = output {
                    append_predictions(path, &stop, Utc::now(), &predictions)?;
                }
            }
            Some(RefreshEvent::Updated(Err(e))) => {
                completed += 1;
                warn!(error = %e, "Arrivals refresh failed, retrying on next interval");
            }
            None => break,
        }

        if refreshes > 0 && completed >= refreshes {
            break;
        }
    }

    scheduler.pause();
    info!(completed, "Stopped watching arrivals");
    Ok(())
}

fn replay_positions(config: &AppConfig, target: Point, samples_path: &str) -> Result<()> {
    let exits = Arc::new(AtomicUsize::new(0));
    let mut monitor = ProximityMonitor::with_thresholds(target, config.proximity);

    let counter = Arc::clone(&exits);
    monitor.on_exit_range(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut reader = csv::Reader::from_path(samples_path)
        .with_context(|| format!("failed to open samples file '{samples_path}'"))?;

    let mut processed = 0usize;
    for row in reader.deserialize() {
        let sample: PositionSample = row.context("malformed position sample")?;
        processed += 1;

        match monitor.process(sample) {
            SampleOutcome::ExitedRange => warn!(
                timestamp = %sample.timestamp,
                distance = monitor.distance_to_target(&sample),
                "Left stop range"
            ),
            outcome => debug!(timestamp = %sample.timestamp, ?outcome, "Sample processed"),
        }
    }

    if processed == 0 {
        bail!("no position samples in '{samples_path}'");
    }

    info!(
        processed,
        exits = exits.load(Ordering::SeqCst),
        in_range = monitor.is_in_range(),
        "Replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predictions_format_flag() {
        let cli = Cli::try_parse_from([
            "arrival_watch",
            "predictions",
            "--agency",
            "mbta",
            "--stop",
            "110",
            "--route",
            "1",
            "--route",
            "47",
            "--format",
            "json",
        ])
        .unwrap();

        let Commands::Predictions { stop, format, .. } = cli.command else {
            panic!("expected predictions subcommand");
        };
        assert_eq!(stop.routes, vec!["1", "47"]);
        // Recorded as a span field by `fetch_once`.
        assert_eq!(format!("{format:?}"), "Json");
    }

    #[test]
    fn test_format_defaults_to_log() {
        let cli =
            Cli::try_parse_from(["arrival_watch", "predictions", "-a", "mbta", "-s", "110"]).unwrap();

        let Commands::Predictions { format, .. } = cli.command else {
            panic!("expected predictions subcommand");
        };
        assert!(matches!(format, Format::Log));
    }
}
