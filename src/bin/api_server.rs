// Admin HTTP server binary: sync triggers plus the interval scheduler

use anyhow::Result;
use gamefinder_sync::api::ApiServer;
use gamefinder_sync::util::db::Db;
use gamefinder_sync::logging::{init_tracing, DEFAULT_FILTER};
use gamefinder_sync::orchestrator::Orchestrator;
use gamefinder_sync::scheduler::{spawn_scheduler, SchedulerConfig};
use gamefinder_sync::util::env as env_util;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    tracing::info!("Initializing gamefinder sync API server");

    env_util::preflight_check(
        "api_server",
        &["API_SECRET"],
        &[
            "DATABASE_URL",
            "API_HOST",
            "API_PORT",
            "API_SECRET",
            "TWITCH_CLIENT_ID",
            "SCHEDULER_ENABLED",
        ],
    )?;
    let server = ApiServer::from_env()?;

    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&env_util::db_url(), max_connections).await?;
    tracing::info!("Database connected successfully");

    let orchestrator = Arc::new(Orchestrator::from_env(db)?);
    let shutdown = CancellationToken::new();
    let timers = spawn_scheduler(
        Arc::clone(&orchestrator),
        SchedulerConfig::from_env(),
        shutdown.clone(),
    );

    let served = server.run(orchestrator).await;

    shutdown.cancel();
    for timer in timers {
        let _ = timer.await;
    }
    served
}
