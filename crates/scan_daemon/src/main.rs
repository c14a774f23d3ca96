//! Entry point of the campsite availability scanner.
//! Runs every configured search once, or keeps scanning on an interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campground_scan::{
    ProfileRegistry, ScanExecutor, ScanExecutorConfig, load_profiles, load_searches,
};
use clap::Parser;
use notification_services::{LogNotifier, Notifier, PushoverNotifier};
use waf_session::{
    ChromeSolver, CredentialStore, GuardedClient, ReqwestTransport, SessionConfig,
    SessionRegistry,
};

/// Watches reservation platforms for campsite availability
#[derive(Parser, Debug)]
#[command(name = "scan_daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// JSON file with the searches to run
    #[arg(long, env = "SEARCHES_FILE", default_value = "config/searches.json")]
    searches: PathBuf,

    /// JSON file with extra or overriding platform profiles
    #[arg(long, env = "PROFILES_FILE")]
    profiles: Option<PathBuf>,

    /// Directory where solved sessions are persisted
    #[arg(long, env = "WAF_SESSION_DIR", default_value = ".waf-sessions")]
    session_dir: PathBuf,

    /// Seconds between passes in daemon mode
    #[arg(long, env = "SCAN_INTERVAL_SECS", default_value_t = 60)]
    interval_secs: u64,

    /// Show the browser window while solving challenges
    #[arg(long)]
    headed: bool,

    /// Log notifications instead of sending them
    #[arg(long)]
    dry_run: bool,
}

fn build_notifier(dry_run: bool) -> Arc<dyn Notifier> {
    if dry_run {
        log::info!("🔇 Dry run, notifications are only logged");
        return Arc::new(LogNotifier);
    }

    match PushoverNotifier::from_env() {
        Ok(notifier) => {
            log::info!("📨 Pushover notifications enabled");
            Arc::new(notifier)
        }
        Err(e) => {
            log::warn!("⚠️ {}, notifications are only logged", e);
            Arc::new(LogNotifier)
        }
    }
}

async fn log_sessions(sessions: &SessionRegistry) {
    for stats in sessions.stats().await {
        log::info!(
            "🔑 {}: credential={} solves={} invalidations={}",
            stats.origin,
            stats.has_credential,
            stats.solves,
            stats.invalidations
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger; chromiumoxide reports unknown CDP events as errors
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(
        "info,chromiumoxide::conn=warn,chromiumoxide::handler=warn",
    ));

    let args = Args::parse();
    log::info!("🚀 Starting campsite scanner...");

    let searches = load_searches(&args.searches)?;
    let profiles = match &args.profiles {
        Some(path) => ProfileRegistry::with_overrides(load_profiles(path)?),
        None => ProfileRegistry::default(),
    };

    let session_config = SessionConfig {
        headless: !args.headed,
        persistence_dir: Some(args.session_dir.clone()),
        ..SessionConfig::default()
    };
    log::info!("🗂️ Sessions persisted in {:?}", args.session_dir);

    let solver = Arc::new(ChromeSolver::new(session_config.clone()));
    let store = session_config
        .persistence_dir
        .clone()
        .map(CredentialStore::new);
    let sessions = Arc::new(SessionRegistry::new(solver, store));

    let transport = ReqwestTransport::new(session_config.request_timeout)
        .context("failed to build HTTP client")?;
    let client = Arc::new(GuardedClient::new(
        Arc::new(transport),
        sessions.clone(),
        session_config.user_agent.clone(),
    ));

    let executor = Arc::new(ScanExecutor::new(
        client,
        profiles,
        searches,
        build_notifier(args.dry_run),
        Some(ScanExecutorConfig {
            interval: Duration::from_secs(args.interval_secs.max(1)),
            ..ScanExecutorConfig::default()
        }),
    )?);

    if args.once {
        let summary = executor.run_once().await;
        log_sessions(&sessions).await;
        log::info!(
            "✅ Done: {} hits, {} notified, {} failed searches",
            summary.hits,
            summary.notified,
            summary.failures
        );
        return Ok(());
    }

    tokio::select! {
        _ = executor.start() => {}
        _ = tokio::signal::ctrl_c() => log::info!("🛑 Interrupted, shutting down"),
    }
    log_sessions(&sessions).await;

    Ok(())
}
