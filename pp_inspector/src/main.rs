use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::Serialize;
use tracing::{info, warn};

use pp_core::store::Database;
use pp_core::{current_cycle_stats, list_alerts, StateCache, ValkeyStore};

mod app;
mod ui;

use app::{channel, DashboardUpdate, InspectorApp};

#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = String::from_utf8(buf.to_vec()) {
            let _ = self.sender.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Powerplay listener inspector", long_about = None)]
struct Cli {
    /// Valkey/Redis instance the listener writes to.
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    cache_url: String,
    /// Key prefix used by the listener.
    #[arg(long, default_value = pp_core::cache::DEFAULT_KEY_PREFIX)]
    key_prefix: String,
    /// SQLite database holding the snipe history and cycle snapshots.
    #[arg(long, default_value = "db.sqlite3")]
    database: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Latest cached record for one system.
    System { id64: u64 },
    /// Systems currently matching the alert filter.
    Alerts,
    /// Cycle stats computed from the cache right now.
    Stats,
    /// Most recent snipes, newest first.
    Snipes {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Stored cycle snapshots, or one snapshot by id.
    History {
        #[arg(long)]
        id: Option<i64>,
    },
    /// Live dashboard of cycle stats and alerts.
    Watch {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if let Command::Watch { interval_secs } = cli.command {
        return watch(&cli, Duration::from_secs(interval_secs.max(1))).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::System { id64 } => {
            let cache = open_cache(&cli).await?;
            let record = cache
                .try_get(*id64)
                .await?
                .ok_or_else(|| eyre!("no cached record for system {id64}"))?;
            print_json(&record)
        }
        Command::Alerts => {
            let cache = open_cache(&cli).await?;
            print_json(&list_alerts(&cache, Utc::now()).await?)
        }
        Command::Stats => {
            let cache = open_cache(&cli).await?;
            print_json(&current_cycle_stats(&cache, Utc::now()).await?)
        }
        Command::Snipes { limit } => print_json(&open_database(&cli)?.recent_snipes(*limit)?),
        Command::History { id: Some(id) } => {
            let stored = open_database(&cli)?
                .cycle_stats_by_id(*id)?
                .ok_or_else(|| eyre!("no cycle snapshot with id {id}"))?;
            print_json(&stored)
        }
        Command::History { id: None } => print_json(&open_database(&cli)?.cycle_stats_history()?),
        Command::Watch { .. } => Ok(()),
    }
}

async fn open_cache(cli: &Cli) -> Result<StateCache> {
    let store = ValkeyStore::connect(&cli.cache_url).await?;
    Ok(StateCache::new(Arc::new(store), cli.key_prefix.clone()))
}

fn open_database(cli: &Cli) -> Result<Database> {
    let database = Database::open(&cli.database)?;
    database.migrate()?;
    Ok(database)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn watch(cli: &Cli, interval: Duration) -> Result<()> {
    let (log_tx, log_rx) = mpsc::channel::<String>();
    let log_writer_tx = log_tx.clone();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(move || ChannelWriter {
            sender: log_writer_tx.clone(),
        })
        .init();

    let cache = open_cache(cli).await?;
    info!("Watching {} every {}s", cli.cache_url, interval.as_secs());

    let (sender, receiver) = channel();
    let (refresh_tx, refresh_rx) = mpsc::channel::<()>();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let _ui_handle = std::thread::spawn(move || -> color_eyre::Result<()> {
        let app = InspectorApp::new(receiver, refresh_tx, shutdown_tx, log_rx)?;
        app.run()
    });

    let mut since_refresh = interval;
    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("Inspector requested shutdown");
            break;
        }
        if refresh_rx.try_recv().is_ok() {
            since_refresh = interval;
        }
        if since_refresh >= interval {
            since_refresh = Duration::ZERO;
            let now = Utc::now();
            match (
                current_cycle_stats(&cache, now).await,
                list_alerts(&cache, now).await,
            ) {
                (Ok(stats), Ok(alerts)) => {
                    if sender
                        .send(DashboardUpdate {
                            fetched_at: now,
                            stats,
                            alerts,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                (Err(err), _) | (_, Err(err)) => warn!("Refresh failed: {}", err),
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        since_refresh += Duration::from_millis(200);
    }

    Ok(())
}
