//! In-process pipeline: storage, job store, crawl workers, and orchestrator.
//!
//! ```text
//! enqueue → JobStore → WorkerPool → ExtractionResult → CrawlCompleted
//!                                                        → Orchestrator
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brandpipe_crawler::{CrawlContext, HostClassifier, HttpFetcher, PageFetcher, StrategyRegistry, WorkerPool};
use brandpipe_shared::{
    AppConfig, BrandPipeError, CrawlJob, FetchConfig, JobState, JobStoreConfig, OnboardingConfig, Result,
    VerifyOutcome, WorkerConfig,
};
use brandpipe_storage::{JobStore, Storage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::completion::CompletionService;
use crate::orchestrator::Orchestrator;

/// Running pipeline. Call [`Pipeline::shutdown`] to stop it.
pub struct Pipeline {
    storage: Arc<Storage>,
    jobs: Arc<JobStore>,
    workers: WorkerPool,
    orchestrator: JoinHandle<()>,
}

impl Pipeline {
    /// Open the configured database and start workers.
    ///
    /// Without a completion service, crawl-completed events are logged and
    /// no onboarding runs are started.
    pub async fn start(
        config: &AppConfig,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(Path::new(&config.storage.database_path)).await?);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&FetchConfig::from(config))?);
        Ok(Self::start_with(config, storage, fetcher, completion))
    }

    pub fn start_with(
        config: &AppConfig,
        storage: Arc<Storage>,
        fetcher: Arc<dyn PageFetcher>,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(JobStore::new(
            Arc::clone(&storage),
            JobStoreConfig::from(config),
            events_tx,
        ));

        let ctx = CrawlContext {
            jobs: Arc::clone(&jobs),
            storage: Arc::clone(&storage),
            fetcher,
            classifier: Arc::new(HostClassifier::new()),
            registry: Arc::new(StrategyRegistry::new()),
        };
        let workers = WorkerPool::spawn(ctx, &WorkerConfig::from(config));

        let orchestrator = match completion {
            Some(completion) => {
                let orch = Orchestrator::new(
                    Arc::clone(&storage),
                    completion,
                    OnboardingConfig::from(config),
                    config.scoring.clone(),
                );
                tokio::spawn(orch.run(events_rx))
            }
            None => tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    info!(job_id = %event.job_id, brand_id = %event.brand_id, "crawl completed (onboarding disabled)");
                }
            }),
        };

        info!("pipeline started");
        Self {
            storage,
            jobs,
            workers,
            orchestrator,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Stop workers, then let the orchestrator settle its runs.
    ///
    /// The orchestrator exits once every [`JobStore`] handle is dropped, so
    /// callers must not keep clones of [`Pipeline::jobs`] past this call.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
        drop(self.jobs);
        if let Err(e) = self.orchestrator.await {
            warn!(error = %e, "orchestrator task panicked");
        }
        info!("pipeline stopped");
    }

    /// Enqueue a job, wait for it, and check the persisted result.
    #[instrument(skip_all, fields(brand_id = %brand_id, url = %target_url))]
    pub async fn verify(&self, brand_id: &str, target_url: &str, timeout: Duration) -> VerifyOutcome {
        let job_id = match self.jobs.enqueue(brand_id, target_url).await {
            Ok(id) => id,
            Err(e) => return VerifyOutcome::JobCreationFailed(e.to_string()),
        };

        let job = match self.jobs.wait_for_terminal(brand_id, &job_id, timeout).await {
            Ok(job) => job,
            Err(BrandPipeError::Timeout(m)) => return VerifyOutcome::Timeout(m),
            Err(e) => return VerifyOutcome::WorkerProcessingFailed(e.to_string()),
        };

        if job.state != JobState::Succeeded {
            return VerifyOutcome::WorkerProcessingFailed(format!(
                "job {job_id} ended {}: {}",
                job.state,
                job.error.as_deref().unwrap_or("no error recorded")
            ));
        }

        self.confirm_persisted(brand_id, job).await
    }

    /// Check that a succeeded job's result is readable for `brand_id`.
    async fn confirm_persisted(&self, brand_id: &str, job: CrawlJob) -> VerifyOutcome {
        let Some(result_ref) = job.result_ref else {
            return VerifyOutcome::PersistenceVerificationFailed(format!(
                "job {} succeeded without a result reference",
                job.id
            ));
        };

        match self.storage.get_extraction_result(brand_id, &result_ref).await {
            Ok(Some(_)) => VerifyOutcome::Success {
                job_id: job.id,
                result_ref,
            },
            Ok(None) => VerifyOutcome::PersistenceVerificationFailed(format!(
                "result {result_ref} not found for brand {brand_id}"
            )),
            Err(e) => VerifyOutcome::PersistenceVerificationFailed(e.to_string()),
        }
    }
}

/// Start a crawl-only pipeline, verify one URL end to end, and stop.
pub async fn run_verification(
    config: &AppConfig,
    brand_id: &str,
    target_url: &str,
    timeout: Duration,
) -> VerifyOutcome {
    let pipeline = match Pipeline::start(config, None).await {
        Ok(p) => p,
        Err(e) => return VerifyOutcome::EnvironmentMissing(e.to_string()),
    };
    let outcome = pipeline.verify(brand_id, target_url, timeout).await;
    pipeline.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.database_path = std::env::temp_dir()
            .join(format!("bp_pipeline_{}.db", uuid::Uuid::now_v7()))
            .to_string_lossy()
            .into_owned();
        config.fetch.allow_private_hosts = true;
        config.fetch.timeout_secs = 5;
        config.jobs.max_attempts = 1;
        config.jobs.worker_count = 2;
        config.jobs.poll_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn verify_succeeds_against_live_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><main><h1>Acme</h1><p>Tools since 1999.</p></main></body></html>"#,
            ))
            .mount(&server)
            .await;

        let outcome = run_verification(&config(), "acme", &server.uri(), Duration::from_secs(10)).await;
        assert!(matches!(outcome, VerifyOutcome::Success { .. }), "{outcome}");
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn verify_reports_worker_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = run_verification(&config(), "acme", &server.uri(), Duration::from_secs(10)).await;
        assert_eq!(outcome.exit_code(), 4, "{outcome}");
        assert!(outcome.to_string().contains("404"));
    }

    #[tokio::test]
    async fn verify_rejects_bad_url_at_creation() {
        let outcome = run_verification(&config(), "acme", "ftp://acme.example", Duration::from_secs(1)).await;
        assert_eq!(outcome.exit_code(), 3, "{outcome}");
    }

    #[tokio::test]
    async fn verify_times_out_on_slow_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>slow</p>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let outcome = run_verification(&config(), "acme", &server.uri(), Duration::from_millis(300)).await;
        assert_eq!(outcome.exit_code(), 5, "{outcome}");
    }

    #[tokio::test]
    async fn unopenable_database_is_environment_missing() {
        let blocker = std::env::temp_dir().join(format!("bp_blocker_{}", uuid::Uuid::now_v7()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut config = config();
        config.storage.database_path = blocker.join("db.sqlite").to_string_lossy().into_owned();

        let outcome = run_verification(&config, "acme", "https://acme.example/", Duration::from_secs(1)).await;
        assert_eq!(outcome.exit_code(), 2, "{outcome}");
    }

    #[tokio::test]
    async fn missing_result_is_persistence_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<main><p>Tools since 1999.</p></main>"))
            .mount(&server)
            .await;

        let pipeline = Pipeline::start(&config(), None).await.unwrap();
        let job_id = pipeline.jobs().enqueue("acme", &server.uri()).await.unwrap();
        let job = pipeline
            .jobs()
            .wait_for_terminal("acme", &job_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Succeeded);

        let own = pipeline.confirm_persisted("acme", job.clone()).await;
        assert_eq!(own.exit_code(), 0, "{own}");

        // Another brand cannot see the result.
        let foreign = pipeline.confirm_persisted("globex", job.clone()).await;
        assert_eq!(foreign.exit_code(), 6, "{foreign}");
        assert!(foreign.to_string().contains("not found for brand globex"));

        let dangling = CrawlJob {
            result_ref: Some("no-such-result".into()),
            ..job.clone()
        };
        assert_eq!(pipeline.confirm_persisted("acme", dangling).await.exit_code(), 6);

        let unreferenced = CrawlJob {
            result_ref: None,
            ..job
        };
        let outcome = pipeline.confirm_persisted("acme", unreferenced).await;
        assert_eq!(outcome.exit_code(), 6);
        assert!(outcome.to_string().contains("without a result reference"));

        pipeline.shutdown().await;
    }
}
