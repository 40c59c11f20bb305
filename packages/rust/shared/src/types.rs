//! Core domain types for the crawl-and-score pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new time-sortable record identifier (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Crawl jobs
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Terminal states are immutable once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Durable record of one crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: String,
    pub brand_id: String,
    pub target_url: String,
    pub state: JobState,
    /// Number of dispatches (leases) so far.
    pub attempts: u32,
    /// Worker currently holding the lease, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reference to the persisted [`ExtractionResult`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
}

/// Published by the Job Store when a job reaches `succeeded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCompleted {
    pub job_id: String,
    pub brand_id: String,
    pub result_ref: String,
}

// ---------------------------------------------------------------------------
// Host classification
// ---------------------------------------------------------------------------

/// Content-management platform that served a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Squarespace,
    Wordpress,
    Shopify,
    Wix,
    Generic,
}

impl HostKind {
    /// Every kind, platform-specific first.
    pub const ALL: [HostKind; 5] = [
        Self::Squarespace,
        Self::Wordpress,
        Self::Shopify,
        Self::Wix,
        Self::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Squarespace => "squarespace",
            Self::Wordpress => "wordpress",
            Self::Shopify => "shopify",
            Self::Wix => "wix",
            Self::Generic => "generic",
        }
    }

    /// Resolve a stored name; anything unrecognised is `Generic`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(Self::Generic)
    }
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of host classification for one fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostProfile {
    pub host_kind: HostKind,
    /// Corroborating signals normalized to `[0, 1]`.
    pub confidence: f64,
    /// Human-readable descriptions of the matched signals.
    pub signals: Vec<String>,
}

impl HostProfile {
    /// The no-match profile.
    pub fn generic() -> Self {
        Self {
            host_kind: HostKind::Generic,
            confidence: 0.0,
            signals: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// A heading or paragraph of brand copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Source element name (`h1`..`h6`, `p`).
    pub tag: String,
    pub text: String,
}

/// An image reference resolved to a canonical absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    pub is_lazy_loaded: bool,
    /// Attribute the URL was read from (`src`, `data-src`, ...).
    pub source_attribute: String,
}

/// Page-level metadata from `<head>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
}

/// Brand signals extracted from one crawled page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub brand_id: String,
    pub source_url: String,
    pub text_blocks: Vec<TextBlock>,
    /// Deduplicated by resolved absolute URL.
    pub images: Vec<ImageAsset>,
    pub detected_host: HostKind,
    pub host_profile: HostProfile,
    #[serde(default)]
    pub metadata: PageMetadata,
    /// SHA-256 of the fetched body.
    pub content_hash: String,
    /// Facets that failed; the remaining facets are still present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_failures: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

/// Immutable point-in-time input to guide generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandSnapshot {
    pub id: String,
    pub brand_id: String,
    pub extraction_result_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted stage of an [`OnboardingRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    SnapshotCreated,
    GuideGenerating,
    GuideReady,
    PlanGenerating,
    PlanReady,
    ContentGenerating,
    Done,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SnapshotCreated => "snapshot_created",
            Self::GuideGenerating => "guide_generating",
            Self::GuideReady => "guide_ready",
            Self::PlanGenerating => "plan_generating",
            Self::PlanReady => "plan_ready",
            Self::ContentGenerating => "content_generating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "snapshot_created" => Ok(Self::SnapshotCreated),
            "guide_generating" => Ok(Self::GuideGenerating),
            "guide_ready" => Ok(Self::GuideReady),
            "plan_generating" => Ok(Self::PlanGenerating),
            "plan_ready" => Ok(Self::PlanReady),
            "content_generating" => Ok(Self::ContentGenerating),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run stage '{other}'")),
        }
    }
}

/// End-to-end onboarding state machine for one brand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingRun {
    pub id: String,
    pub brand_id: String,
    pub snapshot_id: String,
    pub stage: RunStage,
    pub items_queued: u32,
    pub items_completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide: Option<BrandGuide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ContentPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set once a newer run for the same brand has taken over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Voice and formatting rules the BFS engine scores against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrandGuide {
    #[serde(default)]
    pub brand_name: String,
    /// Tone keywords the copy should carry.
    #[serde(default)]
    pub voice: Vec<String>,
    /// Words and phrases the brand never uses.
    #[serde(default)]
    pub avoid: Vec<String>,
    /// Verifiable facts (offers, figures, history) content may cite.
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub pillars: Vec<String>,
    #[serde(default)]
    pub formatting: FormattingRules,
}

/// Formatting constraints for generated posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattingRules {
    /// Overrides the platform character limit when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default = "default_max_hashtags")]
    pub max_hashtags: usize,
    #[serde(default = "default_true")]
    pub allow_emoji: bool,
}

impl Default for FormattingRules {
    fn default() -> Self {
        Self {
            max_length: None,
            max_hashtags: default_max_hashtags(),
            allow_emoji: true,
        }
    }
}

fn default_max_hashtags() -> usize {
    3
}
fn default_true() -> bool {
    true
}

/// Multi-day content plan keyed to a guide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPlan {
    pub items: Vec<PlannedItem>,
}

/// One planned post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedItem {
    pub day: u32,
    pub platform: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
}

/// Scoring state of a generated draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Generating,
    Scored,
    Accepted,
    Rejected,
    Escalated,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Scored => "scored",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Escalated)
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DraftStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "scored" => Ok(Self::Scored),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "escalated" => Ok(Self::Escalated),
            other => Err(format!("unknown draft status '{other}'")),
        }
    }
}

/// A generated post awaiting or past BFS scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDraft {
    pub id: String,
    pub brand_id: String,
    pub run_id: String,
    /// Position of the item in the run's plan.
    pub plan_index: u32,
    pub day: u32,
    pub platform: String,
    pub topic: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfs_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfs_breakdown: Option<BfsScore>,
    pub retry_count: u32,
    pub status: DraftStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Brand Fidelity Score for one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfsScore {
    /// Weighted mean of the dimensions, 0..=100.
    pub overall: f64,
    /// Dimension name → 0..=100.
    pub dimensions: BTreeMap<String, f64>,
    pub passed: bool,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Observable end state of a pipeline verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success { job_id: String, result_ref: String },
    EnvironmentMissing(String),
    JobCreationFailed(String),
    WorkerProcessingFailed(String),
    Timeout(String),
    PersistenceVerificationFailed(String),
}

impl VerifyOutcome {
    /// Process exit code for diagnostic tooling.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::EnvironmentMissing(_) => 2,
            Self::JobCreationFailed(_) => 3,
            Self::WorkerProcessingFailed(_) => 4,
            Self::Timeout(_) => 5,
            Self::PersistenceVerificationFailed(_) => 6,
        }
    }
}

impl std::fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success { job_id, result_ref } => {
                write!(f, "ok: job {job_id} produced result {result_ref}")
            }
            Self::EnvironmentMissing(m) => write!(f, "environment missing: {m}"),
            Self::JobCreationFailed(m) => write!(f, "job creation failed: {m}"),
            Self::WorkerProcessingFailed(m) => write!(f, "worker processing failed: {m}"),
            Self::Timeout(m) => write!(f, "timed out: {m}"),
            Self::PersistenceVerificationFailed(m) => {
                write!(f, "persistence verification failed: {m}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_roundtrip() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::TimedOut,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::TimedOut.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(RunStage::Failed.is_terminal());
        assert!(!RunStage::PlanReady.is_terminal());
        assert!(DraftStatus::Escalated.is_terminal());
        assert!(!DraftStatus::Scored.is_terminal());
    }

    #[test]
    fn unknown_host_kind_falls_back_to_generic() {
        assert_eq!(HostKind::from_name("WordPress"), HostKind::Wordpress);
        assert_eq!(HostKind::from_name("webflow"), HostKind::Generic);
        assert_eq!(HostKind::from_name(""), HostKind::Generic);
    }

    #[test]
    fn guide_parses_with_defaults() {
        let json = r#"{"brand_name": "Fern & Co", "voice": ["warm"]}"#;
        let guide: BrandGuide = serde_json::from_str(json).expect("parse guide");
        assert_eq!(guide.brand_name, "Fern & Co");
        assert!(guide.avoid.is_empty());
        assert_eq!(guide.formatting.max_hashtags, 3);
        assert!(guide.formatting.allow_emoji);
    }

    #[test]
    fn exit_codes_are_distinct() {
        let outcomes = [
            VerifyOutcome::Success {
                job_id: "j".into(),
                result_ref: "r".into(),
            },
            VerifyOutcome::EnvironmentMissing(String::new()),
            VerifyOutcome::JobCreationFailed(String::new()),
            VerifyOutcome::WorkerProcessingFailed(String::new()),
            VerifyOutcome::Timeout(String::new()),
            VerifyOutcome::PersistenceVerificationFailed(String::new()),
        ];
        let mut codes: Vec<i32> = outcomes.iter().map(|o| o.exit_code()).collect();
        codes.dedup();
        assert_eq!(codes, vec![0, 2, 3, 4, 5, 6]);
    }
}
