//! Sensorflow - cron driven sensor poller
//!
//! Loads all devices from the database, registers one trigger per device and
//! polls until interrupted.
//!
//! Usage:
//!   sensorflow --database sqlite:///var/lib/sensorflow.db
//!
//! Environment variables:
//!   SENSORFLOW_DATABASE - database URL or path (default: sensorflow.db)
//!   SENSORFLOW_USER / SENSORFLOW_PASSWORD - accepted, unused by SQLite
//!   SENSORFLOW_MAX_CONCURRENT_POLLS - worker pool size (default: 10)
//!   SENSORFLOW_HTTP_TIMEOUT_SECS - device request timeout (default: 30)

use clap::Parser;
use dotenv::dotenv;
use log::{debug, info, warn};
use sensorflow::devices::DriverRegistry;
use sensorflow::pipeline::{
    Catalog, DatabaseSettings, PollPipeline, PollerConfig, SampleStore, Scheduler, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sensorflow", version, about = "Polls sensors on cron schedules and stores compacted readings")]
struct Cli {
    /// Database URL (`sqlite://<path>`) or file path
    #[arg(short = 'd', long, env = "SENSORFLOW_DATABASE", default_value = DatabaseSettings::DEFAULT_URL)]
    database: String,

    /// Database user
    #[arg(short = 'u', long, env = "SENSORFLOW_USER")]
    user: Option<String>,

    /// Database password
    #[arg(short = 'p', long, env = "SENSORFLOW_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory with the schema files
    #[arg(long, default_value = "sql")]
    schema_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let settings = DatabaseSettings {
        url: cli.database,
        user: cli.user,
        password: cli.password,
    };
    let config = PollerConfig::from_env();

    info!("🚀 Sensorflow {}", env!("CARGO_PKG_VERSION"));
    info!("   ├─ Database: {}", settings.path());
    info!("   ├─ Max concurrent polls: {}", config.max_concurrent_polls);
    info!("   └─ HTTP timeout: {}s", config.http_timeout.as_secs());
    if settings.has_credentials() {
        debug!("Database credentials given, SQLite ignores them");
    }

    info!("🔧 Initializing database...");
    let store = SqliteStore::open(settings.path())?;
    store.migrate(&cli.schema_dir)?;

    let registry = DriverRegistry::with_defaults(config.http_timeout)?;
    debug!("Device drivers: {}", registry.kinds().join(", "));

    let catalog = Catalog::load(&store, &registry)?;
    if catalog.is_empty() {
        warn!("⚠️  No pollable devices found");
    } else {
        info!("✅ Loaded {} devices", catalog.len());
    }

    let store: Arc<dyn SampleStore> = Arc::new(store);
    let pipeline = Arc::new(PollPipeline::new(Arc::new(catalog), store));

    let mut scheduler = Scheduler::new(pipeline, config.max_concurrent_polls);
    let registered = scheduler.register_catalog();
    let handle = scheduler.start();
    info!("✅ Scheduler running with {} devices", registered);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle.shutdown();

    Ok(())
}
