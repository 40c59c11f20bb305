//! Shared types, error model, and configuration for brandpipe.
//!
//! This crate is the foundation depended on by all other brandpipe crates.
//! It provides:
//! - [`BrandPipeError`]: the unified error type
//! - Domain types ([`CrawlJob`], [`ExtractionResult`], [`OnboardingRun`], [`ContentDraft`], ...)
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DimensionPolicy, FetchConfig, FetchSection, JobStoreConfig, JobsSection,
    OnboardingConfig, OnboardingSection, OpenRouterConfig, ScoringConfig, StorageSection,
    WorkerConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_api_key,
};
pub use error::{BrandPipeError, Result};
pub use types::{
    BfsScore, BrandGuide, BrandSnapshot, ContentDraft, ContentPlan, CrawlCompleted, CrawlJob,
    DraftStatus, ExtractionResult, FormattingRules, HostKind, HostProfile, ImageAsset, JobState,
    OnboardingRun, PageMetadata, PlannedItem, RunStage, TextBlock, VerifyOutcome, new_id,
};
