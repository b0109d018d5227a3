//! Wiring & DI. Entry point: bootstrap adapters, inject into services, run the ingestion jobs.
//! No business logic here.
//!
//! `timetable-sync` runs both jobs until Ctrl-C; `timetable-sync --once` runs one timetable and
//! one corrections cycle and exits.

use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use timetable_sync::adapters::notify::{LogNotifier, WebhookNotifier};
use timetable_sync::adapters::persistence::{SqliteRepo, StateJson};
use timetable_sync::adapters::sheets::{HttpSheetFetcher, SheetSource};
use timetable_sync::ports::{GridFetcher, IngestionStateStore, NotificationSink, ScheduleStore};
use timetable_sync::shared::config::AppConfig;
use timetable_sync::usecases::{IngestionService, MergeService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "timetable-sync")]
#[command(about = "Ingest timetable and correction sheets into the current schedule")]
struct Cli {
    /// Run one timetable and one corrections cycle, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("config: {}", e))?;
    let settings = cfg
        .ingestion_settings()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let data_path = cfg.data_dir_or_default();
    let data_dir_abs = data_path
        .canonicalize()
        .unwrap_or_else(|_| data_path.clone());
    info!(path = %data_dir_abs.display(), "data directory");

    // --- Storage ---
    let sqlite_repo = Arc::new(
        SqliteRepo::connect(&data_path)
            .await
            .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?,
    );
    let store: Arc<dyn ScheduleStore> = Arc::clone(&sqlite_repo) as Arc<dyn ScheduleStore>;
    let state_store: Arc<dyn IngestionStateStore> =
        Arc::new(StateJson::new(data_path.join("state.json")));

    // --- Sources & notifications ---
    let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs_or_default());
    let http = HttpSheetFetcher::new(fetch_timeout).map_err(|e| anyhow::anyhow!("{}", e))?;
    let fetcher: Arc<dyn GridFetcher> = Arc::new(SheetSource::new(http));

    let notifier: Arc<dyn NotificationSink> = match &cfg.webhook_url {
        Some(url) if !url.trim().is_empty() => {
            info!(url = %url, "webhook notifications enabled");
            Arc::new(
                WebhookNotifier::new(url.trim().to_string(), fetch_timeout)
                    .map_err(|e| anyhow::anyhow!("{}", e))?,
            )
        }
        _ => {
            warn!("TIMETABLE_SYNC_WEBHOOK_URL not set, notices are only logged");
            Arc::new(LogNotifier)
        }
    };

    // --- Services ---
    let merge = Arc::new(MergeService::new(store));
    let service = Arc::new(IngestionService::new(
        fetcher,
        sqlite_repo,
        merge,
        notifier,
        Some(state_store),
        settings,
    ));
    if let Err(e) = service.restore_state().await {
        warn!(error = %e, "could not restore corrections state, first cycle will merge");
    }

    if cli.once {
        let timetable = service.run_timetable_cycle().await;
        let corrections = service.run_corrections_cycle().await;
        info!(?timetable, ?corrections, "single run finished");
        if timetable.is_err() || corrections.is_err() {
            anyhow::bail!("single run had failures (see log)");
        }
        return Ok(());
    }

    // --- Run until Ctrl-C ---
    let cancel = CancellationToken::new();
    let runner = tokio::spawn(Arc::clone(&service).run(cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, stopping"),
        Err(e) => error!(error = %e, "failed to listen for Ctrl-C, stopping"),
    }
    cancel.cancel();
    runner
        .await
        .map_err(|e| anyhow::anyhow!("ingestion task failed: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_flag_and_unknown_flags() {
        assert!(!Cli::try_parse_from(["timetable-sync"]).unwrap().once);
        assert!(Cli::try_parse_from(["timetable-sync", "--once"]).unwrap().once);
        assert!(Cli::try_parse_from(["timetable-sync", "--onec"]).is_err());
    }
}
