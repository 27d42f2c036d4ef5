//! CLI Entry Point for meter-cache
//!
//! # Usage
//!
//! Poll the meter and serve the cache:
//! ```bash
//! meter-cache --config config/meter_cache.toml run
//! ```
//!
//! Take three readings 5 seconds apart against the mock meter:
//! ```bash
//! meter-cache --mock poll --count 3 --interval 5s
//! ```
//!
//! Dump a persisted cache:
//! ```bash
//! meter-cache dump --output cache.txt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meter_cache::actors::{CacheDumper, Poller};
use meter_cache::adapters::{session_from_config, Meter};
use meter_cache::config::{Config, DEFAULT_CONFIG_PATH};
use meter_cache::logging;
use meter_cache::repository::{self, MeasurementRepository};
use meter_cache::service::HttpService;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meter-cache")]
#[command(about = "Electricity meter poller with a cached HTTP read path", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Talk to the built-in mock meter instead of the serial port
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the meter periodically and serve the cache over HTTP
    Run,

    /// Take a fixed number of readings and print them
    Poll {
        /// Number of readings
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Pause between readings (e.g. "5s", "1m")
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// Print every cached measurement
    Dump {
        /// Output file, stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Run => run(config, cli.mock).await,
        Commands::Poll { count, interval } => poll(config, cli.mock, count, interval).await,
        Commands::Dump { output } => dump(config, output).await,
    }
}

async fn run(config: Config, mock: bool) -> Result<()> {
    let repo = repository::open_from_config(&config.storage).await?;
    let meter = Arc::new(Meter::from_boxed(session_from_config(&config.meter, mock)?));
    info!(meter = %meter.info().await, "Meter session configured");

    let poller = Poller::from_config(meter.clone(), repo.clone(), &config.meter)?;
    let service = HttpService::bind(config.listen_address()?, repo).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_task = tokio::spawn(async move { poller.run(shutdown_rx).await });

    let mut service_rx = shutdown_tx.subscribe();
    let service_task = tokio::spawn(service.serve(async move {
        let _ = service_rx.wait_for(|stop| *stop).await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for the interrupt signal")?;
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    let stats = poll_task.await.context("poller task panicked")?;
    service_task.await.context("service task panicked")??;
    meter.close().await;

    info!(
        stored = stats.stored,
        failed = stats.failed,
        storage_failures = stats.storage_failures,
        "meter-cache stopped"
    );
    Ok(())
}

async fn poll(config: Config, mock: bool, count: u32, interval: Option<Duration>) -> Result<()> {
    let repo = repository::open_from_config(&config.storage).await?;
    let meter = Arc::new(Meter::from_boxed(session_from_config(&config.meter, mock)?));

    let interval = interval.unwrap_or(config.meter.min_poll_spacing);
    let poller = Poller::new(meter.clone(), repo, interval, config.meter.min_poll_spacing)?;
    let poller = match config.meter.poll_timeout {
        Some(timeout) => poller.with_poll_timeout(timeout),
        None => poller,
    };

    for n in 0..count {
        if n > 0 {
            tokio::time::sleep(poller.interval()).await;
        }
        match poller.poll_once().await {
            Ok(measurement) => writeln!(io::stdout(), "{measurement}")?,
            Err(err) => warn!(error = %err, poll = n + 1, "Poll failed"),
        }
    }

    meter.close().await;
    Ok(())
}

async fn dump(config: Config, output: Option<PathBuf>) -> Result<()> {
    if config.storage.path.is_none() {
        warn!("No storage.path configured, the in-memory cache is empty");
    }
    let repo: Arc<dyn MeasurementRepository> = repository::open_from_config(&config.storage).await?;

    let sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };

    let count = CacheDumper::new(repo, sink).run().await?;
    info!(count, "Dump complete");
    Ok(())
}
