//! pagetrail - replay and inspect the page analytics pipeline
//!
//! Feeds recorded page signals through the pipeline against the durable
//! store, and inspects or clears what the pipeline left behind.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/pagetrail/store.db (~/.local/share/pagetrail/store.db)
//! - Logs: $XDG_STATE_HOME/pagetrail/pagetrail.log.YYYY-MM-DD (rolled daily, UTC)
//! - Config: $XDG_CONFIG_HOME/pagetrail/config.toml (~/.config/pagetrail/config.toml)

mod replay;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{ArgAction, Parser, Subcommand};
use pagetrail_core::dispatch::{load_snapshot, read_entries};
use pagetrail_core::storage::KeyValueStore;
use pagetrail_core::{Batch, Config, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pagetrail")]
#[command(about = "Replay and inspect the page analytics pipeline")]
#[command(version)]
struct Args {
    /// Verbose output (debug-level logs and per-event logging)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, user id and the stored snapshot
    Status,

    /// Feed a JSON-lines file of page signals through the pipeline
    Replay {
        /// Signals file, one JSON signal per line
        signals: PathBuf,

        /// Page environment as JSON (url, title, user_agent, viewport, now, ...)
        #[arg(long)]
        env: Option<PathBuf>,

        /// Leave the session open: no session_end, no final flush
        #[arg(long)]
        no_end: bool,
    },

    /// Print batches stored by the local sink
    Log {
        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Clear the stored snapshot and batch log (the user id is kept)
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if args.verbose > 0 {
        config.logging.level = "debug".to_string();
        config.dispatch.debug = true;
    }

    let _log_guard =
        pagetrail_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("pagetrail starting");

    let store_path = Config::store_path();
    tracing::info!(path = %store_path.display(), "Opening store");
    let store = SqliteStore::open(&store_path).context("failed to open store")?;
    store.migrate().context("failed to run store migrations")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    match args.command {
        Command::Status => show_status(&config, store.as_ref()),
        Command::Replay {
            signals,
            env,
            no_end,
        } => replay::run(config, store, &signals, env.as_deref(), !no_end).await,
        Command::Log { json } => show_log(&config, store.as_ref(), json),
        Command::Clear => clear(&config, store.as_ref()),
    }
}

fn show_status(config: &Config, store: &dyn KeyValueStore) -> Result<()> {
    println!("Config: {}", Config::config_path().display());
    println!("Store: {}", Config::store_path().display());
    println!("Log: {}", pagetrail_core::logging::log_file_path().display());
    println!("Sink: {}", sink_label(config));
    println!(
        "Batch size: {} (flush every {}s)",
        config.dispatch.batch_size, config.dispatch.send_interval_secs
    );

    let user_id = store
        .get(&config.dispatch.user_id_key)
        .context("failed to read user id")?;
    println!("User id: {}", user_id.as_deref().unwrap_or("(none)"));

    match load_snapshot(store, &config.dispatch.storage_key) {
        Some(snapshot) => {
            println!(
                "Snapshot: {} event(s), {} conversion(s) from session {}",
                snapshot.events.len(),
                snapshot.conversions.len(),
                snapshot.session_id
            );
            println!("  Last updated: {}", format_millis(snapshot.last_updated));
        }
        None => println!("Snapshot: (none)"),
    }

    let logged = read_entries(store, &config.sink.log_key);
    println!("Logged batches: {}", logged.len());
    Ok(())
}

fn show_log(config: &Config, store: &dyn KeyValueStore, json: bool) -> Result<()> {
    let entries = read_entries(store, &config.sink.log_key);

    if json {
        let rendered =
            serde_json::to_string_pretty(&entries).context("failed to serialize batch log")?;
        println!("{}", rendered);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No batches logged");
        return Ok(());
    }

    for (i, batch) in entries.iter().enumerate() {
        println!("{}", describe_batch(i + 1, batch));
    }
    Ok(())
}

fn describe_batch(index: usize, batch: &Batch) -> String {
    let names: Vec<&str> = batch.events.iter().map(|e| e.name.as_str()).collect();
    format!(
        "#{} {} session={} events={} conversions={}\n    {}",
        index,
        format_millis(batch.timestamp),
        batch.session_id,
        batch.events.len(),
        batch.conversions.len(),
        names.join(", ")
    )
}

fn clear(config: &Config, store: &dyn KeyValueStore) -> Result<()> {
    store
        .remove(&config.dispatch.storage_key)
        .context("failed to clear snapshot")?;
    store
        .remove(&config.sink.log_key)
        .context("failed to clear batch log")?;

    tracing::info!("Cleared stored analytics data");
    println!("Cleared snapshot and batch log");
    Ok(())
}

fn sink_label(config: &Config) -> String {
    match &config.sink.server_url {
        Some(url) if config.sink.kind == pagetrail_core::config::SinkKind::Http => {
            format!("http ({})", url)
        }
        _ => format!("local (key {})", config.sink.log_key),
    }
}

fn format_millis(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
