//! Onboarding orchestrator.
//!
//! Each crawl-completed event starts an [`OnboardingRun`] and drives it
//! through its persisted stages:
//!
//! ```text
//! snapshot_created → guide_generating → guide_ready → plan_generating
//!   → plan_ready → content_generating → done
//! ```
//!
//! Any stage may end in `failed`. A newer run for the same brand supersedes
//! the older one; storage then rejects the old run's writes, so its in-flight
//! work finishes without side effects.

use std::sync::Arc;

use brandpipe_scoring::{Verdict, decide};
use brandpipe_shared::{
    BfsScore, BrandGuide, BrandPipeError, BrandSnapshot, ContentDraft, CrawlCompleted,
    DraftStatus, OnboardingConfig, OnboardingRun, PlannedItem, Result, RunStage, ScoringConfig,
    new_id,
};
use brandpipe_storage::Storage;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::completion::{CompletionKind, CompletionService};
use crate::prompts;

#[derive(Clone)]
pub struct Orchestrator {
    storage: Arc<Storage>,
    completion: Arc<dyn CompletionService>,
    config: OnboardingConfig,
    scoring: ScoringConfig,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<Storage>,
        completion: Arc<dyn CompletionService>,
        config: OnboardingConfig,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            storage,
            completion,
            config,
            scoring,
        }
    }

    /// Resume interrupted runs, then consume events until the channel closes.
    /// Returns once every spawned run has settled.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<CrawlCompleted>) {
        let mut drives = JoinSet::new();

        match self.resume_incomplete().await {
            Ok(runs) => {
                for run in runs {
                    self.spawn_drive(&mut drives, run.brand_id, run.id);
                }
            }
            Err(e) => error!(error = %e, "could not resume incomplete runs"),
        }

        while let Some(event) = events.recv().await {
            match self.handle_crawl_completed(&event).await {
                Ok(run) => self.spawn_drive(&mut drives, run.brand_id, run.id),
                Err(e) => error!(job_id = %event.job_id, error = %e, "could not start onboarding run"),
            }
            while let Some(res) = drives.try_join_next() {
                log_join(res);
            }
        }

        while let Some(res) = drives.join_next().await {
            log_join(res);
        }
        info!("orchestrator stopped");
    }

    fn spawn_drive(&self, drives: &mut JoinSet<()>, brand_id: String, run_id: String) {
        let this = self.clone();
        drives.spawn(async move {
            match this.drive(&brand_id, &run_id).await {
                Ok(stage) => info!(%run_id, %stage, "run settled"),
                Err(e) => {
                    error!(%run_id, error = %e, "run driver failed");
                    let reason = e.to_string();
                    if let Err(e) = this
                        .storage
                        .set_run_stage(&run_id, RunStage::Failed, Some(&reason))
                        .await
                    {
                        error!(%run_id, error = %e, "could not mark run failed");
                    }
                }
            }
        });
    }

    /// Start a run for a completed crawl. Does not drive it.
    #[instrument(skip_all, fields(brand_id = %event.brand_id, job_id = %event.job_id))]
    pub async fn handle_crawl_completed(&self, event: &CrawlCompleted) -> Result<OnboardingRun> {
        self.start_run(&event.brand_id, &event.result_ref).await
    }

    /// Snapshot the extraction result and open a new run, superseding any
    /// older non-terminal run of the brand.
    pub async fn start_run(&self, brand_id: &str, result_ref: &str) -> Result<OnboardingRun> {
        self.storage
            .get_extraction_result(brand_id, result_ref)
            .await?
            .ok_or_else(|| BrandPipeError::NotFound(format!("extraction result {result_ref}")))?;

        let now = Utc::now();
        let snapshot = BrandSnapshot {
            id: new_id(),
            brand_id: brand_id.to_string(),
            extraction_result_ref: result_ref.to_string(),
            created_at: now,
        };
        self.storage.insert_snapshot(&snapshot).await?;

        let run = OnboardingRun {
            id: new_id(),
            brand_id: brand_id.to_string(),
            snapshot_id: snapshot.id,
            stage: RunStage::SnapshotCreated,
            items_queued: 0,
            items_completed: 0,
            guide: None,
            plan: None,
            error: None,
            superseded_by: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };

        for old in self.storage.insert_run(&run).await? {
            info!(superseded = %old, run_id = %run.id, "older run superseded");
        }
        info!(run_id = %run.id, "onboarding run started");
        Ok(run)
    }

    /// Fail runs idle past the stale timeout; return the rest for driving.
    pub async fn resume_incomplete(&self) -> Result<Vec<OnboardingRun>> {
        let now = Utc::now();
        let cutoff = TimeDelta::from_std(self.config.stale_run_timeout)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut resumable = Vec::new();
        for run in self.storage.list_resumable_runs().await? {
            if run.updated_at < cutoff {
                let reason = format!("stale: no progress since {}", run.updated_at.to_rfc3339());
                warn!(run_id = %run.id, brand_id = %run.brand_id, "failing stale run");
                self.storage
                    .set_run_stage(&run.id, RunStage::Failed, Some(&reason))
                    .await?;
            } else {
                info!(run_id = %run.id, stage = %run.stage, "resuming run");
                resumable.push(run);
            }
        }
        Ok(resumable)
    }

    /// Advance a run from its persisted stage until it is terminal or no
    /// longer current. Returns the final stored stage.
    #[instrument(skip_all, fields(brand_id = %brand_id, run_id = %run_id))]
    pub async fn drive(&self, brand_id: &str, run_id: &str) -> Result<RunStage> {
        loop {
            let run = self.load_run(brand_id, run_id).await?;
            if run.stage.is_terminal() || run.superseded_by.is_some() {
                return Ok(run.stage);
            }

            let advanced = match run.stage {
                RunStage::SnapshotCreated | RunStage::GuideGenerating => {
                    self.generate_guide(&run).await?
                }
                RunStage::GuideReady | RunStage::PlanGenerating => self.generate_plan(&run).await?,
                RunStage::PlanReady | RunStage::ContentGenerating => {
                    self.generate_content(&run).await?
                }
                RunStage::Done | RunStage::Failed => return Ok(run.stage),
            };

            if !advanced {
                let run = self.load_run(brand_id, run_id).await?;
                info!(stage = %run.stage, "run no longer current; stopping");
                return Ok(run.stage);
            }
        }
    }

    async fn load_run(&self, brand_id: &str, run_id: &str) -> Result<OnboardingRun> {
        self.storage
            .get_run(brand_id, run_id)
            .await?
            .ok_or_else(|| BrandPipeError::NotFound(format!("run {run_id}")))
    }

    // -----------------------------------------------------------------------
    // Stages. Each returns Ok(false) when storage rejected the write.
    // -----------------------------------------------------------------------

    async fn generate_guide(&self, run: &OnboardingRun) -> Result<bool> {
        if !self
            .storage
            .set_run_stage(&run.id, RunStage::GuideGenerating, None)
            .await?
        {
            return Ok(false);
        }

        let snapshot = self
            .storage
            .get_snapshot(&run.brand_id, &run.snapshot_id)
            .await?
            .ok_or_else(|| BrandPipeError::NotFound(format!("snapshot {}", run.snapshot_id)))?;
        let extraction = self
            .storage
            .get_extraction_result(&run.brand_id, &snapshot.extraction_result_ref)
            .await?
            .ok_or_else(|| {
                BrandPipeError::NotFound(format!(
                    "extraction result {}",
                    snapshot.extraction_result_ref
                ))
            })?;

        let prompt = prompts::guide_prompt(&extraction);
        match self
            .generate_with_retry(CompletionKind::Guide, &prompt, prompts::parse_guide)
            .await
        {
            Ok(guide) => {
                info!(voice = ?guide.voice, "brand guide ready");
                self.storage.set_run_guide(&run.id, &guide).await
            }
            Err(e) => self.fail_run(&run.id, &e).await,
        }
    }

    async fn generate_plan(&self, run: &OnboardingRun) -> Result<bool> {
        let guide = run
            .guide
            .as_ref()
            .ok_or_else(|| BrandPipeError::NotFound(format!("guide for run {}", run.id)))?;

        if !self
            .storage
            .set_run_stage(&run.id, RunStage::PlanGenerating, None)
            .await?
        {
            return Ok(false);
        }

        let prompt = prompts::plan_prompt(guide, self.config.plan_items);
        let items = self.config.plan_items;
        match self
            .generate_with_retry(CompletionKind::Plan, &prompt, |text| {
                prompts::parse_plan(text, items)
            })
            .await
        {
            Ok(plan) => {
                info!(items = plan.items.len(), "content plan ready");
                self.storage.set_run_plan(&run.id, &plan).await
            }
            Err(e) => self.fail_run(&run.id, &e).await,
        }
    }

    async fn generate_content(&self, run: &OnboardingRun) -> Result<bool> {
        let (Some(guide), Some(plan)) = (run.guide.clone(), run.plan.clone()) else {
            return Err(BrandPipeError::NotFound(format!(
                "guide or plan for run {}",
                run.id
            )));
        };

        if !self
            .storage
            .set_run_stage(&run.id, RunStage::ContentGenerating, None)
            .await?
        {
            return Ok(false);
        }

        // One draft per planned item; existing rows from an earlier attempt are kept.
        for (index, item) in plan.items.iter().enumerate() {
            let plan_index = u32::try_from(index).map_err(|_| {
                BrandPipeError::Generation(format!("plan item {index} exceeds the draft index range"))
            })?;
            let draft = new_draft(run, plan_index, item);
            self.storage.insert_draft(&draft).await?;
        }

        let pending: Vec<ContentDraft> = self
            .storage
            .list_drafts(&run.brand_id, &run.id)
            .await?
            .into_iter()
            .filter(|d| !d.status.is_terminal())
            .collect();

        let guide = Arc::new(guide);
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();

        for draft in pending {
            let Some(item) = plan.items.get(draft.plan_index as usize).cloned() else {
                warn!(draft_id = %draft.id, index = draft.plan_index, "draft has no plan item");
                continue;
            };
            let this = self.clone();
            let guide = Arc::clone(&guide);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| BrandPipeError::Generation("draft pool closed".into()))?;
                this.produce_draft(&guide, &item, draft).await
            });
        }

        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "draft task failed"),
                Err(e) => error!(error = %e, "draft task panicked"),
            }
        }

        let drafts = self.storage.list_drafts(&run.brand_id, &run.id).await?;
        let unfinished = drafts.iter().filter(|d| !d.status.is_terminal()).count();
        if unfinished == 0 && drafts.len() == plan.items.len() {
            info!(drafts = drafts.len(), "all drafts settled");
            return self.storage.set_run_stage(&run.id, RunStage::Done, None).await;
        }

        let reason = format!(
            "{} of {} drafts did not finish",
            unfinished + plan.items.len().saturating_sub(drafts.len()),
            plan.items.len()
        );
        self.storage
            .set_run_stage(&run.id, RunStage::Failed, Some(&reason))
            .await
    }

    async fn fail_run(&self, run_id: &str, err: &BrandPipeError) -> Result<bool> {
        warn!(%run_id, error = %err, "run failed");
        self.storage
            .set_run_stage(run_id, RunStage::Failed, Some(&err.to_string()))
            .await
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    /// Generate, score, and decide until the draft is terminal.
    async fn produce_draft(
        &self,
        guide: &BrandGuide,
        item: &PlannedItem,
        mut draft: ContentDraft,
    ) -> Result<()> {
        let mut feedback: Option<String> = None;

        loop {
            let prompt = prompts::draft_prompt(guide, item, feedback.as_deref());
            let body = match self
                .generate_with_retry(CompletionKind::Draft, &prompt, prompts::parse_draft)
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    draft.status = DraftStatus::Rejected;
                    draft.last_error = Some(e.to_string());
                    return self.finish_draft(draft).await;
                }
            };

            draft.body = body;
            let score = match brandpipe_scoring::score(&draft, guide, &self.scoring) {
                Ok(s) => {
                    draft.last_error = None;
                    Some(s)
                }
                Err(e) => {
                    draft.last_error = Some(e.to_string());
                    None
                }
            };
            draft.bfs_score = score.as_ref().map(|s| s.overall);
            draft.bfs_breakdown = score.clone();
            draft.status = DraftStatus::Scored;
            draft.updated_at = Utc::now();
            if !self.storage.update_draft(&draft).await? {
                return Ok(());
            }

            match decide(score.as_ref(), draft.retry_count, self.config.max_draft_retries) {
                Verdict::Accept => {
                    draft.status = DraftStatus::Accepted;
                    return self.finish_draft(draft).await;
                }
                Verdict::Escalate => {
                    draft.status = DraftStatus::Escalated;
                    return self.finish_draft(draft).await;
                }
                Verdict::Retry => {
                    feedback = Some(shortfall(score.as_ref(), draft.last_error.as_deref()));
                    draft.retry_count += 1;
                    draft.status = DraftStatus::Generating;
                    draft.updated_at = Utc::now();
                    if !self.storage.update_draft(&draft).await? {
                        return Ok(());
                    }
                    info!(draft_id = %draft.id, retry = draft.retry_count, "regenerating draft");
                }
            }
        }
    }

    async fn finish_draft(&self, mut draft: ContentDraft) -> Result<()> {
        draft.updated_at = Utc::now();
        if self.storage.update_draft(&draft).await? {
            self.storage.increment_run_completed(&draft.run_id).await?;
            info!(draft_id = %draft.id, status = %draft.status, score = ?draft.bfs_score, "draft settled");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion calls
    // -----------------------------------------------------------------------

    /// Call the completion service up to `max_generation_attempts` times with
    /// exponential backoff. A parse failure counts as a failed attempt.
    ///
    /// Each call runs in its own task; on timeout the task is left to finish
    /// and its output is ignored.
    async fn generate_with_retry<T>(
        &self,
        kind: CompletionKind,
        prompt: &str,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        let attempts = self.config.max_generation_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let factor = 1u32 << (attempt - 2).min(16);
                tokio::time::sleep(self.config.backoff_base.saturating_mul(factor)).await;
            }

            let completion = Arc::clone(&self.completion);
            let owned = prompt.to_string();
            let call = tokio::spawn(async move { completion.generate(&owned, kind).await });

            let outcome = match tokio::time::timeout(self.config.completion_timeout, call).await {
                Ok(Ok(Ok(text))) => parse(&text),
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(e)) => Err(BrandPipeError::Generation(format!("{kind} call aborted: {e}"))),
                Err(_) => Err(BrandPipeError::Timeout(format!(
                    "{kind} completion exceeded {:?}",
                    self.config.completion_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(%kind, attempt, max = attempts, error = %e, "generation attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(BrandPipeError::Generation(format!(
            "{kind} generation failed after {attempts} attempts: {last_error}"
        )))
    }
}

fn new_draft(run: &OnboardingRun, plan_index: u32, item: &PlannedItem) -> ContentDraft {
    let now = Utc::now();
    ContentDraft {
        id: new_id(),
        brand_id: run.brand_id.clone(),
        run_id: run.id.clone(),
        plan_index,
        day: item.day,
        platform: item.platform.clone(),
        topic: item.topic.clone(),
        body: String::new(),
        bfs_score: None,
        bfs_breakdown: None,
        retry_count: 0,
        status: DraftStatus::Generating,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Feedback for the next draft attempt.
fn shortfall(score: Option<&BfsScore>, error: Option<&str>) -> String {
    match score {
        Some(s) => {
            let dims: Vec<String> = s
                .dimensions
                .iter()
                .map(|(name, v)| format!("{name} {v:.0}"))
                .collect();
            format!("brand fidelity {:.0}/100 ({})", s.overall, dims.join(", "))
        }
        None => format!("scoring failed: {}", error.unwrap_or("unknown")),
    }
}

fn log_join(res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        error!(error = %e, "run task panicked");
    }
}
