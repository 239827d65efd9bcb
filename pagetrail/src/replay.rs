//! Replay of recorded page signals

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pagetrail_core::storage::KeyValueStore;
use pagetrail_core::{build_sink, Analytics, Config, PageEnvironment, Signal};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Page environment file: the page description plus an optional start time
#[derive(Deserialize, Default)]
struct EnvironmentFile {
    #[serde(flatten)]
    page: PageEnvironment,
    /// Pins the page clock; wall time when absent
    now: Option<DateTime<Utc>>,
}

/// Run one page session over the signals in `signals_path`
pub async fn run(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    signals_path: &Path,
    env_path: Option<&Path>,
    end_session: bool,
) -> Result<()> {
    let signals = read_signals(signals_path)?;
    let env = Arc::new(load_environment(env_path)?);

    let sink = build_sink(&config.sink, store.clone()).context("failed to create sink")?;
    let mut analytics = Analytics::new(config, store, env.clone(), sink)
        .context("failed to start analytics session")?;

    println!("Session: {}", analytics.session().session_id());
    println!("User: {}", analytics.session().user_id());
    println!("Replaying {} signal(s)...", signals.len());

    let mut applied = 0usize;
    let mut rejected = 0usize;

    for (line, signal) in &signals {
        if let Signal::Tick { advance_secs } = signal {
            if let Err(e) = env.advance(Duration::from_secs(*advance_secs)) {
                rejected += 1;
                tracing::warn!(line, error = %e, "Clock advance rejected");
                eprintln!("line {}: {}", line, e);
                continue;
            }
        }

        match analytics.apply(signal).await {
            Ok(outcome) => {
                applied += 1;
                if let Some(flush) = outcome.flush {
                    tracing::debug!(line, ?flush, "Flush during replay");
                }
            }
            Err(e) => {
                rejected += 1;
                tracing::warn!(line, error = %e, "Signal rejected");
                eprintln!("line {}: {}", line, e);
            }
        }
    }

    if end_session {
        let outcome = analytics
            .end_session()
            .await
            .context("failed to end session")?;
        tracing::info!(?outcome, "Final flush");
    }

    tracing::debug!(info = ?analytics.debug_info(), "Replay finished");

    let stats = analytics.stats();
    println!("\nReplay complete:");
    println!("  Signals applied: {}", applied);
    println!("  Signals rejected: {}", rejected);
    println!("  Events recorded: {}", stats.events_recorded);
    println!("  Conversions recorded: {}", stats.conversions_recorded);
    println!(
        "  Batches delivered: {}",
        stats.batches_sent - stats.batches_dropped
    );
    println!("  Batches dropped: {}", stats.batches_dropped);
    println!("  Events pending: {}", analytics.dispatcher().pending_count());
    println!("  Session phase: {}", analytics.phase());

    Ok(())
}

/// Parse a JSON-lines signals file, skipping blank lines
fn read_signals(path: &Path) -> Result<Vec<(usize, Signal)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read signals file {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let signal = serde_json::from_str::<Signal>(line)
                .with_context(|| format!("invalid signal on line {}", i + 1))?;
            Ok((i + 1, signal))
        })
        .collect()
}

/// Load the page environment and pin its clock
fn load_environment(path: Option<&Path>) -> Result<PageEnvironment> {
    let file = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read environment file {}", path.display()))?;
            serde_json::from_str::<EnvironmentFile>(&content)
                .with_context(|| format!("invalid environment file {}", path.display()))?
        }
        None => EnvironmentFile::default(),
    };

    file.page.freeze_at(file.now.unwrap_or_else(Utc::now));
    Ok(file.page)
}
