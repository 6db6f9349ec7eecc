//! Job executor.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ppe_models::JobId;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::VideoProcessor;

/// Something that runs a submitted job to completion.
pub trait JobHandler: Send + Sync + 'static {
    /// Run the job. `cancel` flips to true when the executor gives up on it.
    fn handle(
        self: Arc<Self>,
        job_id: JobId,
        cancel: watch::Receiver<bool>,
    ) -> impl Future<Output = ()> + Send;

    /// Called for a queued job that shutdown stopped from ever starting.
    fn discard(self: Arc<Self>, job_id: JobId) -> impl Future<Output = ()> + Send;
}

/// Message recorded on jobs dropped from the queue at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

impl JobHandler for VideoProcessor {
    async fn handle(self: Arc<Self>, job_id: JobId, cancel: watch::Receiver<bool>) {
        // Outcome is recorded in the registry by the processor itself.
        let _ = self.process(&job_id, cancel).await;
        metrics::set_jobs_active(self.registry().active_count().await);
    }

    async fn discard(self: Arc<Self>, job_id: JobId) {
        self.registry()
            .update(&job_id, |job| job.fail(SHUTDOWN_MESSAGE))
            .await;
        metrics::record_job_failed("shutdown");
    }
}

/// Accepts job ids and runs them with bounded concurrency.
pub struct JobExecutor {
    tx: mpsc::UnboundedSender<JobId>,
    job_semaphore: Arc<Semaphore>,
    max_jobs: usize,
    shutdown: watch::Sender<bool>,
    abort: watch::Sender<bool>,
    accepting: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl JobExecutor {
    /// Start the dispatch loop.
    ///
    /// The returned handle completes once the loop has stopped accepting
    /// work after [`JobExecutor::shutdown`].
    pub fn start<H: JobHandler>(
        handler: Arc<H>,
        config: &WorkerConfig,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let (abort, _) = watch::channel(false);
        let max_jobs = config.max_concurrent_jobs.max(1);

        let executor = Arc::new(Self {
            tx,
            job_semaphore: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
            shutdown,
            abort,
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown_timeout: config.shutdown_timeout,
        });

        info!("Starting job executor with {} max concurrent jobs", max_jobs);
        let handle = tokio::spawn(Arc::clone(&executor).run(handler, rx));
        (executor, handle)
    }

    /// Queue a job. Fails once shutdown has begun.
    pub fn submit(&self, job_id: JobId) -> WorkerResult<()> {
        if !self.is_running() {
            return Err(WorkerError::ShuttingDown);
        }
        self.tx.send(job_id).map_err(|_| WorkerError::ShuttingDown)?;
        metrics::record_job_submitted();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_jobs - self.job_semaphore.available_permits()
    }

    async fn run<H: JobHandler>(
        self: Arc<Self>,
        handler: Arc<H>,
        mut rx: mpsc::UnboundedReceiver<JobId>,
    ) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut dropped = Vec::new();

        loop {
            let job_id = tokio::select! {
                _ = stopped(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                next = rx.recv() => match next {
                    Some(job_id) => job_id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = stopped(&mut shutdown_rx) => {
                    dropped.push(job_id);
                    break;
                }
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        dropped.push(job_id);
                        break;
                    }
                },
            };

            debug!(job_id = %job_id, "Dispatching job");
            let handler = Arc::clone(&handler);
            let abort_rx = self.abort.subscribe();
            tokio::spawn(async move {
                let _permit = permit;
                handler.handle(job_id, abort_rx).await;
            });
        }

        rx.close();
        dropped.extend(std::iter::from_fn(|| rx.try_recv().ok()));
        if !dropped.is_empty() {
            warn!("{} queued jobs were not started before shutdown", dropped.len());
        }
        for job_id in dropped {
            Arc::clone(&handler).discard(job_id).await;
        }
    }

    /// Stop accepting work and wait for in-flight jobs.
    ///
    /// Jobs still running after the shutdown timeout are cancelled.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "{} jobs still running after {:?}, cancelling",
                self.in_flight(),
                self.shutdown_timeout
            );
            let _ = self.abort.send(true);
            self.wait_for_jobs().await;
        }

        info!("Job executor stopped");
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.max_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
