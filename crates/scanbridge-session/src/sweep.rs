// SPDX-License-Identifier: MIT
//
// Background expiry sweep -- periodically removes sessions that have gone
// idle past the timeout.
//
// Runs on its own schedule for the lifetime of the process and is never
// invoked by clients. Deletion goes through the same store mutex as the
// request handlers, so a sweep can never race an in-flight append or
// remove on the same session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use scanbridge_core::error::{Result, ScanbridgeError};

use crate::store::SessionStore;

/// Periodic expiry sweeper for a [`SessionStore`].
///
/// Created stopped; call [`start`](Self::start) to spawn the background
/// task and [`stop`](Self::stop) for a graceful shutdown.
pub struct ExpirySweeper {
    interval: Duration,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    /// Whether the sweep task is currently running.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Spawn the sweep loop against the given store.
    ///
    /// Idempotent: calling start on a running sweeper is a no-op.
    pub fn start(&mut self, store: Arc<SessionStore>) {
        if self.task_handle.is_some() {
            debug!("expiry sweeper already running");
            return;
        }

        let interval = self.interval;
        let shutdown = Arc::clone(&self.shutdown_signal);

        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = store.timeout().as_secs(),
            "expiry sweeper started"
        );

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("expiry sweeper received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let removed = store.sweep_at(Instant::now());
                        if removed > 0 {
                            info!(removed, live = store.session_count(), "expiry sweep pass");
                        }
                    }
                }
            }
        });

        self.task_handle = Some(handle);
    }

    /// Signal the sweep loop to exit and await its completion.
    ///
    /// A no-op when the sweeper is not running; notifying without a live
    /// task would store a permit that kills the next started loop on its
    /// first tick.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };

        self.shutdown_signal.notify_one();
        handle
            .await
            .map_err(|e| ScanbridgeError::Server(format!("sweeper task join: {e}")))?;
        info!("expiry sweeper stopped");
        Ok(())
    }
}
