use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use eventroll::auth::session::purge_expired;
use eventroll::config::{Cli, Config};
use eventroll::state::AppState;
use eventroll::upload::sessions::remove_files;
use eventroll::{db, routes};

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    std::fs::create_dir_all(config.blobs_path())?;
    // Partial uploads do not survive a restart.
    let upload_tmp = config.upload_tmp_path();
    if upload_tmp.exists() {
        std::fs::remove_dir_all(&upload_tmp)?;
    }
    std::fs::create_dir_all(&upload_tmp)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, pool);

    tokio::spawn(housekeeping(state.clone()));

    let app = routes::router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop expired sessions and abandoned uploads.
async fn housekeeping(state: AppState) {
    let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        interval.tick().await;

        let purged = state
            .db
            .get()
            .map_err(eventroll::error::AppError::from)
            .and_then(|conn| purge_expired(&conn));
        match purged {
            Ok(0) => {}
            Ok(n) => tracing::info!("Purged {} expired sessions", n),
            Err(e) => tracing::warn!("Session purge failed: {}", e),
        }

        let stale = state.uploads.lock().await.clear_stale();
        remove_files(&stale).await;
    }
}
