// SPDX-License-Identifier: MIT
//
// scanbridged -- Scan hand-off session daemon.
//
// Entry point. Initialises logging, loads configuration, and runs the
// hand-off server plus the session expiry sweeper until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use scanbridge_core::AppConfig;
use scanbridge_core::error::Result;
use scanbridge_session::store::StoreLimits;
use scanbridge_session::{ExpirySweeper, SessionStore};
use scanbridge_server::ScanServer;

/// Default config file looked up in the working directory.
const CONFIG_FILE: &str = "scanbridge.json";

/// Environment variable that overrides the config file path.
const CONFIG_ENV: &str = "SCANBRIDGE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("scanbridged starting");

    let config = load_config();
    info!(
        port = config.server_port,
        session_timeout_secs = config.session_timeout_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "configuration loaded"
    );

    let store = Arc::new(SessionStore::new(
        config.session_timeout(),
        StoreLimits {
            max_sessions: config.max_sessions,
            max_images_per_session: config.max_images_per_session,
        },
    ));

    let mut sweeper = ExpirySweeper::new(config.sweep_interval());
    sweeper.start(Arc::clone(&store));

    let mut server = ScanServer::new(Some(config.server_port));
    server.set_max_request_bytes(config.max_request_bytes);
    server.start(Arc::clone(&store)).await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(scanbridge_core::ScanbridgeError::Io)?;

    info!("shutdown requested");
    server.stop().await?;
    sweeper.stop().await?;
    info!(
        remaining_sessions = store.session_count(),
        "scanbridged stopped"
    );
    Ok(())
}

/// Load configuration from `$SCANBRIDGE_CONFIG`, falling back to
/// `./scanbridge.json`, falling back to defaults.  A present but unreadable
/// file logs a warning rather than aborting startup.
fn load_config() -> AppConfig {
    let path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));

    match std::fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(config) => {
                info!(path = %path.display(), "config file loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed config file, using defaults");
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}
