//! `turkbridge`: moves question tasks between the local SQLite store and the
//! crowd-work marketplace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use turkbridge_core::models::TaskId;
use turkbridge_core::persistence::{MigrationStore, TaskIntake};
use turkbridge_core::sqlite::SqliteStore;
use turkbridge_core::sync::TaskSynchronizer;

mod config;
mod http_marketplace;

use config::AppConfig;
use http_marketplace::HttpMarketplace;

const DEFAULT_CONFIG_PATH: &str = "turkbridge.json";

#[derive(Parser)]
#[command(name = "turkbridge")]
#[command(about = "Synchronize crowdsourced question tasks with a marketplace", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `database_path` from the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the task store schema
    Migrate,

    /// Add a new INIT task whose question definition is read from a file
    Enqueue {
        id: String,
        payload_file: PathBuf,
    },

    /// Post every INIT task to the marketplace
    Post,

    /// Collect answers for posted tasks and approve them
    Retrieve,

    /// Post, then retrieve
    Sync,

    /// Run `sync` repeatedly until interrupted
    Watch {
        #[arg(long, default_value = "60")]
        interval_secs: u64,
    },
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(error) = run(Cli::parse()) {
        tracing::error!(error = %format!("{error:#}"), "turkbridge failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = AppConfig::load(&config_path, explicit)?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("cannot open '{}'", config.database_path.display()))?,
    );
    store.migrate_to_latest()?;

    match cli.command {
        Commands::Migrate => {
            println!("schema version {}", store.current_version()?);
        }
        Commands::Enqueue { id, payload_file } => {
            let payload = std::fs::read_to_string(&payload_file)
                .with_context(|| format!("failed to read '{}'", payload_file.display()))?;
            store.enqueue_task(&TaskId::new(id.clone()), &payload)?;
            println!("enqueued {id}");
        }
        Commands::Post => {
            let synchronizer = synchronizer(&config, store.clone())?;
            let posted = synchronizer.post_questions();
            println!("posted: {posted}");
        }
        Commands::Retrieve => {
            let synchronizer = synchronizer(&config, store.clone())?;
            print_finished(&synchronizer);
        }
        Commands::Sync => {
            let synchronizer = synchronizer(&config, store.clone())?;
            println!("posted: {}", synchronizer.post_questions());
            print_finished(&synchronizer);
        }
        Commands::Watch { interval_secs } => {
            if interval_secs == 0 {
                bail!("--interval-secs must be greater than zero");
            }
            let synchronizer = Arc::new(synchronizer(&config, store.clone())?);
            watch(synchronizer, Duration::from_secs(interval_secs))?;
        }
    }

    Arc::try_unwrap(store)
        .map_err(|_| anyhow::anyhow!("task store is still shared at shutdown"))?
        .close()?;
    Ok(())
}

fn synchronizer(config: &AppConfig, store: Arc<SqliteStore>) -> Result<TaskSynchronizer> {
    let marketplace = Arc::new(HttpMarketplace::new(config.require_marketplace()?));
    Ok(TaskSynchronizer::new(
        store,
        marketplace,
        config.sync.clone(),
    ))
}

fn print_finished(synchronizer: &TaskSynchronizer) {
    let finished = synchronizer.retrieve_answers();
    println!("finished: {}", finished.len());
    for task_id in finished {
        println!("  {task_id}");
    }
}

fn watch(synchronizer: Arc<TaskSynchronizer>, period: Duration) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted; stopping watch");
                    return Ok::<(), anyhow::Error>(());
                }
            }

            let pass = synchronizer.clone();
            let running = tokio::task::spawn_blocking(move || {
                pass.post_questions();
                pass.retrieve_answers()
            });
            tokio::select! {
                joined = running => {
                    let finished = joined.context("sync pass panicked")?;
                    tracing::info!(finished = finished.len(), "watch pass complete");
                }
                _ = &mut ctrl_c => {
                    // Runtime shutdown waits for the blocking pass to return.
                    tracing::info!("interrupted during a pass; stopping watch");
                    return Ok(());
                }
            }
        }
    })
}
