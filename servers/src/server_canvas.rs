//! # Canvas Gateway Server
//!
//! Brings the canvas gateway up in order and keeps it running:
//!
//! - **Runtime**: a single-threaded tokio runtime; handlers and jobs
//!   interleave only at await points.
//! - **Configuration**: `.env` files, then defaults < JSON file < env < CLI.
//! - **Logging**: console plus a daily JSON file in the log directory.
//! - **Startup**: data layer sync, listener, the three startup computations,
//!   then the maintenance jobs. A failed sync exits non-zero without ever
//!   binding the port.
//! - **Graceful Shutdown**: `tokio-graceful` waits for Ctrl-C/SIGTERM and
//!   gives open connections 10 seconds to finish.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};
use tokio_graceful::Shutdown;
use tracing::{info, warn};

use lib_canvas::channels::SocketServer;
use lib_canvas::configs::{load_config, CanvasSettings, ConfigError};
use lib_canvas::connections::PgDataLayer;
use lib_canvas::core::{
    FactionService, MaintenanceJob, MaintenanceScheduler, MemoryReclaimer, RankingService, StartupSequencer,
    UpgradeRouter,
};
use lib_canvas::loggers::setup_logging;
use lib_canvas::services::{BanList, PgFactions, PgRanking};
use lib_canvas::web::{build_router, AssetManifest, CanvasContext, DirChunkSource, HttpUpgrade, PageCache, RouteCollaborators, StaticFiles};

const APP_NAME: &str = "server_canvas";

/// Loads the generic `.env` file, then the platform one.
fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

/// Channel pools and the ban list are swept every `gc_interval`. Ranking,
/// faction and ban refreshes only run when configured.
fn build_scheduler(
    settings: &CanvasSettings,
    channels: [&SocketServer; 2],
    bans: Arc<BanList>,
    ranking: Arc<PgRanking>,
    factions: Arc<PgFactions>,
) -> Result<MaintenanceScheduler> {
    let mut scheduler = MaintenanceScheduler::new();

    let mut reclaimer = MemoryReclaimer::new().with_target(bans);
    for channel in channels {
        reclaimer = reclaimer.with_target(channel.pool());
    }
    scheduler.add(reclaimer.into_job(settings.gc_interval)?);

    if let Some(period) = settings.ranking_refresh {
        let ranking = ranking.clone();
        scheduler.add(MaintenanceJob::every("ranking-refresh", period, move || {
            let ranking = ranking.clone();
            async move { ranking.update_ranking().await }
        })?);
    }

    if let Some(period) = settings.faction_refresh {
        let factions = factions.clone();
        scheduler.add(MaintenanceJob::every("faction-refresh", period, move || {
            let factions = factions.clone();
            async move { factions.update().await }
        })?);
    }

    if let Some(expr) = &settings.bans_cron {
        scheduler.add(MaintenanceJob::cron("bans-reload", expr, move || {
            let factions = factions.clone();
            async move { factions.update_bans().await }
        })?);
    }

    Ok(scheduler)
}

/// Current-thread runtime with IO and timers enabled.
fn build_runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

fn main() -> Result<()> {
    build_runtime().context("building tokio runtime")?.block_on(run())
}

/// # Server Lifecycle
///
/// 1.  Loads `.env`, the configuration and sets up logging.
/// 2.  Builds the page cache, the data layer and the services on top of it.
/// 3.  Builds the channel subsystems, the upgrade router and the HTTP router.
/// 4.  Runs the startup sequence; an abort ends the process with an error.
/// 5.  Waits for a shutdown signal and stops the server within 10 seconds.
async fn run() -> Result<()> {
    load_dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("loading configuration"),
    };

    let _log_guard = setup_logging(APP_NAME, &settings.log_dir, &settings.log_level)?;
    match &settings.config_path {
        Some(path) => info!(path = %path.display(), "config file merged"),
        None => info!("no config file, using defaults, environment and CLI"),
    }

    // --- Phase 1: pages and data ---
    let assets = AssetManifest::from_json_file(&settings.assets_path)?;
    let pages = PageCache::build(assets, settings.page_max_age_secs).context("building page cache")?;

    let data_layer = PgDataLayer::connect(&settings.database_url).context("creating database pool")?;
    let ranking = Arc::new(PgRanking::new(data_layer.pool()));
    let bans = Arc::new(BanList::new());
    let factions = Arc::new(PgFactions::new(data_layer.pool(), bans.clone()));

    // --- Phase 2: channels and routes ---
    let user = Arc::new(SocketServer::user());
    let api = Arc::new(SocketServer::api());
    let upgrades = UpgradeRouter::<HttpUpgrade>::new(user.clone(), api.clone());

    let ctx = CanvasContext::new(
        pages,
        &settings.discord_invite,
        Arc::new(DirChunkSource::new(&settings.chunks_dir)),
        StaticFiles::new(&settings.public_dir),
        upgrades,
    );
    let app = build_router(
        ctx,
        RouteCollaborators {
            tiles_dir: settings.tiles_dir.clone(),
            ..Default::default()
        },
    );

    let scheduler = build_scheduler(&settings, [user.as_ref(), api.as_ref()], bans, ranking.clone(), factions.clone())?;

    // --- Phase 3: startup sequence ---
    let running = StartupSequencer::new(settings.bind_addr, Arc::new(data_layer), ranking, factions, app, scheduler)
        .run()
        .await
        .context("startup aborted")?;

    let shutdown: Shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: initiate graceful shutdown");
        running.stop().await;
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => info!(
            "shutdown: gracefully {}s after shutdown signal received",
            elapsed.as_secs_f64()
        ),
        Err(e) => warn!("shutdown: forcefully due to timeout: {}", e),
    }

    info!("Bye!");
    Ok(())
}
