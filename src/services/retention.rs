//! Background retention cleanup
//!
//! Periodically removes terminal sessions older than the configured age.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::manager::SessionManager;
use crate::config::RetentionConfig;
use crate::utils::helpers::format_duration;

#[derive(Debug)]
pub struct RetentionWorker {
    max_age: chrono::Duration,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl RetentionWorker {
    pub fn new(config: &RetentionConfig) -> Self {
        Self {
            // out-of-range ages are rejected by validation; treat them as "never"
            max_age: config.max_age().unwrap_or(chrono::Duration::MAX),
            interval: Duration::from_secs(config.interval_seconds.max(1)),
            handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start the cleanup task.
    ///
    /// The task only holds a weak reference and exits once the manager is
    /// dropped.
    pub fn start(&mut self, weak: Weak<SessionManager>) {
        if self.handle.is_some() {
            warn!("Retention task is already running");
            return;
        }

        let max_age = self.max_age;
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(manager) = weak.upgrade() else {
                    info!("Session manager dropped, retention task exiting");
                    break;
                };

                if let Err(e) = manager.cleanup(max_age).await {
                    error!(error = %e, "Retention cleanup failed");
                }
            }
        });

        self.handle = Some(handle);
        info!(
            interval_secs = self.interval.as_secs(),
            max_age = %format_duration(self.max_age),
            "Started retention task"
        );
    }

    /// Stop the cleanup task
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped retention task");
        }
    }
}

impl Drop for RetentionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
