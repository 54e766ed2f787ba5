use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use whenwx_service::batch;
use whenwx_service::config::ServiceConfig;
use whenwx_service::dev_mode::MockSource;
use whenwx_service::events::EventCatalog;
use whenwx_service::format::EventView;
use whenwx_service::freshness;
use whenwx_service::ingest::cache::DatasetCache;
use whenwx_service::ingest::{self, ForecastSource};
use whenwx_service::logging::{self, Component};
use whenwx_service::persist;
use whenwx_service::query::QueryService;
use whenwx_service::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "whenwx", version, about = "Weather event timing: when, how long, and when again")]
struct Cli {
    /// Config file (default: ./whenwx.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve /query, /events and /health over HTTP
    Serve,
    /// Compute every event for every grid cell and persist the result
    Batch {
        /// Use the synthetic dev-mode grid instead of the configured source
        #[arg(long)]
        mock: bool,
        /// JSON output path (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write rows to PostgreSQL (needs DATABASE_URL)
        #[arg(long)]
        postgres: bool,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Answer one query from the command line
    Query {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value = "freezing")]
        event: String,
        #[arg(long)]
        mock: bool,
    },
    /// List the event catalog
    Events,
    /// Print NEW_DATA=true|false depending on the upstream init time
    CheckNewData {
        /// Processed marker path (overrides config)
        #[arg(long)]
        marker: Option<PathBuf>,
        #[arg(long)]
        mock: bool,
    },
}

fn open_source(config: &ServiceConfig, mock: bool) -> Result<Arc<dyn ForecastSource>> {
    if mock {
        return Ok(Arc::new(MockSource::default()));
    }
    ingest::source_from_uri(&config.source, config.http_timeout())
        .with_context(|| format!("failed to configure forecast source '{}'", config.source))
}

fn query_service(config: &ServiceConfig, catalog: EventCatalog, mock: bool) -> Result<QueryService> {
    let catalog = Arc::new(catalog);
    if config.on_demand || mock {
        let source = open_source(config, mock)?;
        let cache = Arc::new(DatasetCache::new(source, config.cache_ttl()));
        Ok(QueryService::on_demand(catalog, cache))
    } else {
        Ok(QueryService::precomputed(catalog, config.output_path.clone()))
    }
}

fn run_serve(config: &ServiceConfig, catalog: EventCatalog) -> Result<()> {
    let state = AppState::new(query_service(config, catalog, false)?, config.request_timeout());
    let addr = config.bind_address();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime
        .block_on(server::serve(state.clone(), &addr))
        .with_context(|| format!("query server on {} failed", addr))?;
    drop(runtime);
    // Last handle to the source is released here, outside the runtime: a
    // blocking HTTP client must not be dropped from async context.
    drop(state);
    Ok(())
}

fn run_batch(
    config: &ServiceConfig,
    catalog: &EventCatalog,
    mock: bool,
    output: Option<PathBuf>,
    postgres: bool,
    workers: Option<usize>,
) -> Result<()> {
    let source = open_source(config, mock)?;
    let workers = workers
        .or(config.batch_workers)
        .unwrap_or_else(batch::default_workers);

    let result = batch::run_batch(source.as_ref(), catalog, workers, Utc::now())
        .context("batch run failed")?;

    let path = output.unwrap_or_else(|| config.output_path.clone());
    persist::json::write_output(&path, &result)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if postgres {
        let Some(url) = config.database_url.as_deref() else {
            bail!("--postgres requires DATABASE_URL");
        };
        let mut client = persist::postgres::connect(url).context("failed to connect to PostgreSQL")?;
        persist::postgres::ensure_schema(&mut client)?;
        persist::postgres::write_output(&mut client, &result)?;
    }

    freshness::mark_processed(&config.marker_path, &result)?;

    println!(
        "Batch complete: {} processed, {} failed -> {}",
        result.events_processed.len(),
        result.events_failed.len(),
        path.display()
    );
    Ok(())
}

fn run_query(
    config: &ServiceConfig,
    catalog: EventCatalog,
    lat: f64,
    lon: f64,
    event: &str,
    mock: bool,
) -> Result<()> {
    let service = query_service(config, catalog, mock)?;
    let response = service.query(lat, lon, event, Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn print_events(catalog: &EventCatalog) {
    for event in catalog.events() {
        let view = EventView::from(event);
        println!(
            "{:<12} {} ({} {} {}{})",
            view.id, view.name, view.variable, view.operator, view.threshold_display, view.unit
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init_logger(
        config.log_level()?,
        config.log_file.as_deref(),
        config.console_timestamps,
    )
    .context("failed to open log file")?;
    let catalog = config.catalog()?;
    tracing::debug!(component = %Component::Server, events = ?catalog.ids(), source = %config.source, "configuration loaded");

    match cli.command {
        Command::Serve => run_serve(&config, catalog),
        Command::Batch {
            mock,
            output,
            postgres,
            workers,
        } => run_batch(&config, &catalog, mock, output, postgres, workers),
        Command::Query {
            lat,
            lon,
            event,
            mock,
        } => run_query(&config, catalog, lat, lon, &event, mock),
        Command::Events => {
            print_events(&catalog);
            Ok(())
        }
        Command::CheckNewData { marker, mock } => {
            let source = open_source(&config, mock)?;
            let marker = marker.unwrap_or_else(|| config.marker_path.clone());
            for line in freshness::check_new_data(source.as_ref(), &marker).report_lines() {
                println!("{}", line);
            }
            Ok(())
        }
    }
}
