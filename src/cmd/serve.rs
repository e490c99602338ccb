//! Board server command (`talio serve`).

use anyhow::{Context, Result};
use talio::board::db::BoardDb;
use talio::board::server::{ServerConfig, start_server};
use talio::config::TalioConfig;
use talio::logging::init_tracing;
use tracing::warn;

pub async fn cmd_serve(config: &TalioConfig, init: bool) -> Result<()> {
    let db_path = config.db_path();

    if init {
        // Just initialize the database
        BoardDb::new(&db_path)
            .with_context(|| format!("Failed to initialize database at {}", db_path.display()))?;
        println!("Board database initialized at {}", db_path.display());
        return Ok(());
    }

    let log_dir = config.log_dir();
    let _log_guard = init_tracing(
        config.log_level(),
        config.toml.logging.json,
        log_dir.as_deref(),
    )?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    start_server(ServerConfig {
        host: config.host().to_string(),
        port: config.port()?,
        db_path,
        dev_mode: config.dev_mode(),
        admin_password: config.admin_password(),
        default_wait: config.default_wait(),
        max_wait: config.max_wait(),
        session_idle: config.session_idle(),
    })
    .await
}
