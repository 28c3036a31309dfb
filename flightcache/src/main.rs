mod config;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::{CommonConfig, Config, ConfigError};
use metrics_exporter_statsd::StatsdBuilder;
use reconciler::metrics_defs::ALL_METRICS;
use reconciler::{
    BuildError, FlightCache, FlightId, FlightSummary, Outcome, SaveError, StoreError, SummaryQuery,
};
use serde::Serialize;
use serde_json::json;
use shared::metrics_defs::find;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "flightcache";

#[derive(Parser)]
#[command(about = "Cache-aside flight record lookups")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Resolve the track of one flight.
    Track { id: String },
    /// Resolve the tracks of several flights in one batch.
    Tracks {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Look up the summaries of a callsign by takeoff and landing day (UTC).
    Summary {
        #[arg(long)]
        callsign: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Save the flight summaries in a JSON file for an owner.
    Save {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// List the flights linked to an owner.
    Flights {
        #[arg(long)]
        owner: String,
    },
    /// Resolve the tracks of every flight linked to an owner.
    OwnerTracks {
        #[arg(long)]
        owner: String,
    },
    /// List the metrics this binary can emit, or describe one of them.
    Metrics { name: Option<String> },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("--config is required for this command")]
    MissingConfig,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let CliCommand::Metrics { name } = &cli.command {
        return print_metrics(name.as_deref());
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_metrics(name: Option<&str>) -> ExitCode {
    match metric_lines(name) {
        Some(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("error: unknown metric {}", name.unwrap_or_default());
            ExitCode::FAILURE
        }
    }
}

fn metric_lines(name: Option<&str>) -> Option<Vec<String>> {
    match name {
        Some(name) => find(ALL_METRICS, name).map(|def| vec![def.to_string()]),
        None => Some(ALL_METRICS.iter().map(ToString::to_string).collect()),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli.config.ok_or(CliError::MissingConfig)?;
    let config = Config::from_file(&path)?;

    let _sentry = init_logging(&config.common);
    init_metrics(&config.common)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(cli.command, config))
}

/// Installs the fmt subscriber, plus the sentry layer when a DSN is set. The
/// returned guard flushes sentry on drop.
fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}

async fn run_async(command: CliCommand, config: Config) -> Result<(), CliError> {
    let cache = FlightCache::from_config(&config.reconciler).await?;

    let output = match command {
        CliCommand::Track { id } => outcome_json(cache.track(&FlightId::from(id)).await),
        CliCommand::Tracks { ids } => {
            let ids: Vec<FlightId> = ids.into_iter().map(FlightId::from).collect();
            let outcomes = cache.tracks(&ids).await;
            serde_json::Value::Array(outcomes.into_iter().map(outcome_json).collect())
        }
        CliCommand::Summary { callsign, from, to } => {
            let query = SummaryQuery::new(callsign, from, to);
            outcome_json(cache.summary(&query).await)
        }
        CliCommand::Save { owner, file } => {
            let body = tokio::fs::read(&file).await?;
            let flights: Vec<FlightSummary> = serde_json::from_slice(&body)?;
            serde_json::to_value(cache.save(flights, &owner).await?)?
        }
        CliCommand::Flights { owner } => serde_json::to_value(cache.flights_for(&owner).await?)?,
        CliCommand::OwnerTracks { owner } => {
            let outcomes = cache.tracks_for(&owner).await?;
            serde_json::Value::Array(outcomes.into_iter().map(outcome_json).collect())
        }
        CliCommand::Metrics { .. } => serde_json::Value::Null,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn outcome_json<R: Serialize>(outcome: Outcome<R>) -> serde_json::Value {
    match outcome {
        Outcome::Hit(record) => json!({"source": "store", "record": record}),
        Outcome::Fetched(record) => json!({"source": "upstream", "record": record}),
        Outcome::Failed(failure) => json!({"error": failure.to_string()}),
    }
}
