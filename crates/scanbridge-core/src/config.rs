// SPDX-License-Identifier: MIT
//
// Application configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port for the scan hand-off HTTP server.
    pub server_port: u16,
    /// Sessions with no activity for this long are removed by the sweep.
    pub session_timeout_secs: u64,
    /// Interval between expiry sweep passes.
    pub sweep_interval_secs: u64,
    /// Maximum captured images per session.
    pub max_images_per_session: usize,
    /// Maximum live sessions held by the process.
    pub max_sessions: usize,
    /// Maximum bytes accepted per HTTP request (image uploads are base64,
    /// so this bounds per-capture memory).
    pub max_request_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 8462,
            session_timeout_secs: 600,
            sweep_interval_secs: 60,
            max_images_per_session: 100,
            max_sessions: 1024,
            max_request_bytes: 32 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
