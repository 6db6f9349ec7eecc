//! Periodic removal of finished jobs and their files.

use std::time::Duration;

use ppe_media::fs_utils::remove_if_exists;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// Upper bound between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Deletes jobs that finished longer ago than the retention window.
pub struct RetentionSweeper {
    registry: JobRegistry,
    retention: Duration,
    sweep_interval: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: JobRegistry, retention: Duration) -> Self {
        // Sweep often enough that files outlive the window by at most ~10%.
        let sweep_interval = (retention / 10)
            .clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        Self {
            registry,
            retention,
            sweep_interval,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.retention.is_zero()
    }

    /// Sweep until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.enabled() {
            info!("Job retention is disabled");
            return;
        }

        info!(
            "Starting retention sweeper (retention: {:?}, interval: {:?})",
            self.retention, self.sweep_interval
        );

        let mut ticker = interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_once().await;
                    if removed > 0 {
                        info!("Retention sweep removed {} jobs", removed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Remove every expired job and its files. Returns the number removed.
    pub async fn sweep_once(&self) -> usize {
        let expired = self.registry.expired(self.retention).await;
        let mut removed = 0;

        for job in expired {
            let logger = JobLogger::new(&job.id, "retention");
            if let Some(paths) = &job.paths {
                for path in paths.all() {
                    if let Err(e) = remove_if_exists(path).await {
                        logger.log_warning(&format!(
                            "Failed to delete {}: {}",
                            path.display(),
                            e
                        ));
                    }
                }
            } else {
                warn!(job_id = %job.id, "Expired job has no recorded files");
            }

            if self.registry.remove(&job.id).await.is_some() {
                removed += 1;
            } else {
                error!(job_id = %job.id, "Expired job vanished during sweep");
            }
        }

        metrics::record_retention_removed(removed);
        removed
    }
}
