//! Crawl workers and the worker pool.
//!
//! A worker leases one job at a time, fetches and extracts the page,
//! persists the [`ExtractionResult`](brandpipe_shared::ExtractionResult),
//! and reports the outcome. Job state changes only through [`JobStore`].

use std::sync::Arc;
use std::time::Duration;

use brandpipe_shared::{BrandPipeError, CrawlJob, JobState, Result, WorkerConfig, new_id};
use brandpipe_storage::{JobStore, Storage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};
use url::Url;

use crate::classifier::HostClassifier;
use crate::extract::extract_document;
use crate::fetch::PageFetcher;
use crate::strategies::StrategyRegistry;

/// Floor for the lease heartbeat period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Shared handles every worker needs.
#[derive(Clone)]
pub struct CrawlContext {
    pub jobs: Arc<JobStore>,
    pub storage: Arc<Storage>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub classifier: Arc<HostClassifier>,
    pub registry: Arc<StrategyRegistry>,
}

/// Result of one [`CrawlWorker::run_once`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No job was eligible.
    Idle,
    Succeeded { job_id: String, result_ref: String },
    /// `state` is `None` when the lease was lost before the failure was recorded.
    Failed {
        job_id: String,
        state: Option<JobState>,
    },
    /// Work finished but another worker now owns the job; the result is discarded.
    LeaseLost { job_id: String },
}

pub struct CrawlWorker {
    id: String,
    ctx: CrawlContext,
}

impl CrawlWorker {
    pub fn new(id: impl Into<String>, ctx: CrawlContext) -> Self {
        Self { id: id.into(), ctx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and fully process at most one job.
    pub async fn run_once(&self) -> Result<WorkOutcome> {
        let Some(job) = self.ctx.jobs.lease(&self.id).await? else {
            return Ok(WorkOutcome::Idle);
        };

        let span = info_span!("crawl_job", job_id = %job.id, brand_id = %job.brand_id, attempt = job.attempts);
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: CrawlJob) -> Result<WorkOutcome> {
        let period = (self.ctx.jobs.config().visibility_timeout / 3).max(MIN_HEARTBEAT);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        let work = self.process(&job);
        tokio::pin!(work);

        let outcome = loop {
            tokio::select! {
                res = &mut work => break res,
                _ = heartbeat.tick() => {
                    match self.ctx.jobs.extend_lease(&job.id, &self.id).await {
                        Ok(true) => {}
                        Ok(false) => warn!("lease no longer held"),
                        Err(e) => warn!(error = %e, "lease heartbeat failed"),
                    }
                }
            }
        };

        match outcome {
            Ok(result_ref) => {
                if self.ctx.jobs.complete(&job.id, &self.id, &result_ref).await? {
                    info!(%result_ref, "crawl succeeded");
                    Ok(WorkOutcome::Succeeded {
                        job_id: job.id.clone(),
                        result_ref,
                    })
                } else {
                    warn!(%result_ref, "lease lost before completion; discarding result");
                    if let Err(e) = self
                        .ctx
                        .storage
                        .discard_extraction_result(&job.id, &result_ref)
                        .await
                    {
                        warn!(%result_ref, error = %e, "could not discard orphaned result");
                    }
                    Ok(WorkOutcome::LeaseLost { job_id: job.id.clone() })
                }
            }
            Err(e) => {
                let state = self.ctx.jobs.fail(&job.id, &self.id, &e).await?;
                Ok(WorkOutcome::Failed {
                    job_id: job.id.clone(),
                    state,
                })
            }
        }
    }

    /// Fetch → classify → extract → persist. Returns the result reference.
    async fn process(&self, job: &CrawlJob) -> Result<String> {
        let url = Url::parse(&job.target_url).map_err(|e| {
            BrandPipeError::invalid_input(format!("stored url '{}': {e}", job.target_url))
        })?;

        let page = self.ctx.fetcher.fetch(&url).await?;
        let result = extract_document(
            &job.brand_id,
            &job.target_url,
            &page,
            &self.ctx.classifier,
            &self.ctx.registry,
        );

        self.ctx
            .storage
            .insert_extraction_result(&job.id, &result)
            .await
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A fixed set of workers polling the job store until shut down.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(ctx: CrawlContext, config: &WorkerConfig) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let run = new_id();

        let handles = (0..config.worker_count)
            .map(|i| {
                let worker = CrawlWorker::new(format!("worker-{i}-{run}"), ctx.clone());
                tokio::spawn(worker_loop(worker, config.poll_interval, rx.clone()))
            })
            .collect();

        info!(workers = config.worker_count, "worker pool started");
        Self { shutdown, handles }
    }

    /// Signal every worker and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(worker: CrawlWorker, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match worker.run_once().await {
            Ok(WorkOutcome::Idle) => true,
            Ok(_) => false,
            Err(e) => {
                error!(worker_id = worker.id(), error = %e, "worker iteration failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
