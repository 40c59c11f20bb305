//! Durable crawl job queue with lease-based ownership.
//!
//! [`JobStore`] is the only writer of crawl job state. A lease gives one
//! worker exclusive `running` ownership of a job until it completes, fails,
//! or lets the lease age past the visibility timeout.

use std::sync::Arc;
use std::time::Duration;

use brandpipe_shared::{
    BrandPipeError, CrawlCompleted, CrawlJob, JobState, JobStoreConfig, Result, new_id,
};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::instrument;
use url::Url;

use crate::Storage;

/// How often [`JobStore::wait_for_terminal`] re-reads the job.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Crawl job lifecycle: enqueue, lease, heartbeat, complete, fail.
pub struct JobStore {
    storage: Arc<Storage>,
    config: JobStoreConfig,
    events: mpsc::UnboundedSender<CrawlCompleted>,
}

impl JobStore {
    /// `events` receives one [`CrawlCompleted`] per job that reaches `succeeded`.
    pub fn new(
        storage: Arc<Storage>,
        config: JobStoreConfig,
        events: mpsc::UnboundedSender<CrawlCompleted>,
    ) -> Self {
        Self {
            storage,
            config,
            events,
        }
    }

    pub fn config(&self) -> &JobStoreConfig {
        &self.config
    }

    /// Create a queued job for `brand_id`. Returns the new job id.
    #[instrument(skip_all, fields(brand_id = %brand_id, url = %target_url))]
    pub async fn enqueue(&self, brand_id: &str, target_url: &str) -> Result<String> {
        let brand_id = brand_id.trim();
        if brand_id.is_empty() {
            return Err(BrandPipeError::invalid_input("brand id must not be blank"));
        }
        let url = validate_target_url(target_url)?;

        let job = CrawlJob {
            id: new_id(),
            brand_id: brand_id.to_string(),
            target_url: url.to_string(),
            state: JobState::Queued,
            attempts: 0,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            heartbeat_at: None,
            completed_at: None,
            error: None,
            result_ref: None,
        };
        self.storage.insert_crawl_job(&job).await?;

        tracing::info!(job_id = %job.id, "job enqueued");
        Ok(job.id)
    }

    /// Claim the oldest eligible job for `worker_id`, or `None` if nothing is
    /// eligible or the worker still holds a live lease.
    #[instrument(skip_all, fields(worker_id = %worker_id))]
    pub async fn lease(&self, worker_id: &str) -> Result<Option<CrawlJob>> {
        let now = Utc::now();
        let cutoff = now
            .checked_sub_signed(self.visibility_timeout())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired = self
            .storage
            .expire_crawl_jobs(now, cutoff, self.config.max_attempts)
            .await?;
        if expired > 0 {
            tracing::warn!(expired, "abandoned jobs exhausted their attempts");
        }

        let job = self
            .storage
            .lease_crawl_job(worker_id, now, cutoff, self.config.max_attempts)
            .await?;

        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, attempts = job.attempts, "job leased");
        }
        Ok(job)
    }

    /// Refresh the lease on a job the worker still owns.
    pub async fn extend_lease(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        self.storage
            .heartbeat_crawl_job(job_id, worker_id, Utc::now())
            .await
    }

    /// Mark an owned job `succeeded` and publish [`CrawlCompleted`].
    ///
    /// Returns `false` without side effects if the job is already terminal
    /// or the lease has passed to another worker.
    #[instrument(skip_all, fields(job_id = %job_id, worker_id = %worker_id))]
    pub async fn complete(&self, job_id: &str, worker_id: &str, result_ref: &str) -> Result<bool> {
        let Some(job) = self
            .storage
            .complete_crawl_job(job_id, worker_id, result_ref, Utc::now())
            .await?
        else {
            tracing::debug!("complete ignored: job not owned or already terminal");
            return Ok(false);
        };

        let event = CrawlCompleted {
            job_id: job.id,
            brand_id: job.brand_id,
            result_ref: result_ref.to_string(),
        };
        if self.events.send(event).is_err() {
            tracing::warn!("no crawl-completed subscriber; event dropped");
        }
        tracing::info!("job succeeded");
        Ok(true)
    }

    /// Record a failure for an owned job. Retryable errors re-queue the job
    /// while attempts remain; anything else fails it terminally.
    ///
    /// Returns the resulting state, or `None` if the worker no longer owns it.
    #[instrument(skip_all, fields(job_id = %job_id, worker_id = %worker_id))]
    pub async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &BrandPipeError,
    ) -> Result<Option<JobState>> {
        let state = self
            .storage
            .fail_crawl_job(
                job_id,
                worker_id,
                &error.to_string(),
                error.is_retryable(),
                self.config.max_attempts,
                Utc::now(),
            )
            .await?;

        match state {
            Some(JobState::Queued) => tracing::warn!(%error, "job failed, re-queued"),
            Some(state) => tracing::error!(%error, %state, "job failed terminally"),
            None => tracing::debug!("fail ignored: job not owned or already terminal"),
        }
        Ok(state)
    }

    /// Brand-scoped job lookup.
    pub async fn get(&self, brand_id: &str, job_id: &str) -> Result<CrawlJob> {
        self.storage
            .get_crawl_job(brand_id, job_id)
            .await?
            .ok_or_else(|| BrandPipeError::NotFound(format!("job {job_id}")))
    }

    /// Poll until the job is terminal or `timeout` elapses.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn wait_for_terminal(
        &self,
        brand_id: &str,
        job_id: &str,
        timeout: Duration,
    ) -> Result<CrawlJob> {
        let poll = async {
            loop {
                let job = self.get(brand_id, job_id).await?;
                if job.state.is_terminal() {
                    return Ok::<_, BrandPipeError>(job);
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            BrandPipeError::Timeout(format!(
                "job {job_id} not terminal after {}s",
                timeout.as_secs_f64()
            ))
        })?
    }

    fn visibility_timeout(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.visibility_timeout).unwrap_or(TimeDelta::MAX)
    }
}

/// Accept only absolute http(s) URLs with a host.
fn validate_target_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| BrandPipeError::invalid_input(format!("malformed url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(BrandPipeError::invalid_input(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(BrandPipeError::invalid_input(format!("url '{raw}' has no host")));
    }
    Ok(url)
}
