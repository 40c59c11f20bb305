//! SQL migration definitions for the brandpipe database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: crawl_jobs, extraction_results",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawl jobs; state transitions go through the job store only
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id           TEXT PRIMARY KEY,
    brand_id     TEXT NOT NULL,
    target_url   TEXT NOT NULL,
    state        TEXT NOT NULL DEFAULT 'queued',
    attempts     INTEGER NOT NULL DEFAULT 0,
    worker_id    TEXT,
    created_at   TEXT NOT NULL,
    started_at   TEXT,
    heartbeat_at TEXT,
    completed_at TEXT,
    error        TEXT,
    result_ref   TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_jobs_state ON crawl_jobs(state, created_at);
CREATE INDEX IF NOT EXISTS idx_crawl_jobs_brand ON crawl_jobs(brand_id);

-- Extracted brand signals, one row per successful crawl
CREATE TABLE IF NOT EXISTS extraction_results (
    id            TEXT PRIMARY KEY,
    brand_id      TEXT NOT NULL,
    job_id        TEXT NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    source_url    TEXT NOT NULL,
    detected_host TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    result_json   TEXT NOT NULL,
    extracted_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extraction_results_brand ON extraction_results(brand_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Onboarding: brand_snapshots, onboarding_runs, content_drafts",
            sql: r#"
CREATE TABLE IF NOT EXISTS brand_snapshots (
    id                    TEXT PRIMARY KEY,
    brand_id              TEXT NOT NULL,
    extraction_result_ref TEXT NOT NULL REFERENCES extraction_results(id),
    created_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_brand_snapshots_brand ON brand_snapshots(brand_id);

CREATE TABLE IF NOT EXISTS onboarding_runs (
    id              TEXT PRIMARY KEY,
    brand_id        TEXT NOT NULL,
    snapshot_id     TEXT NOT NULL REFERENCES brand_snapshots(id),
    stage           TEXT NOT NULL,
    items_queued    INTEGER NOT NULL DEFAULT 0,
    items_completed INTEGER NOT NULL DEFAULT 0,
    guide_json      TEXT,
    plan_json       TEXT,
    error           TEXT,
    superseded_by   TEXT,
    started_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    completed_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_onboarding_runs_brand ON onboarding_runs(brand_id);

CREATE TABLE IF NOT EXISTS content_drafts (
    id                  TEXT PRIMARY KEY,
    brand_id            TEXT NOT NULL,
    run_id              TEXT NOT NULL REFERENCES onboarding_runs(id) ON DELETE CASCADE,
    plan_index          INTEGER NOT NULL,
    day                 INTEGER NOT NULL,
    platform            TEXT NOT NULL,
    topic               TEXT NOT NULL,
    body                TEXT NOT NULL DEFAULT '',
    bfs_score           REAL,
    bfs_breakdown_json  TEXT,
    retry_count         INTEGER NOT NULL DEFAULT 0,
    status              TEXT NOT NULL,
    last_error          TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE(run_id, plan_index)
);

CREATE INDEX IF NOT EXISTS idx_content_drafts_run ON content_drafts(run_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
