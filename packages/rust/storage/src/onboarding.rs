//! Brand snapshots, onboarding runs, and content drafts.
//!
//! Run and draft writes are conditional on the run being current: once a run
//! is superseded or terminal, writes affect zero rows and report `false`.

use brandpipe_shared::{
    BrandGuide, BrandPipeError, BrandSnapshot, ContentDraft, ContentPlan, DraftStatus,
    OnboardingRun, Result, RunStage,
};
use chrono::Utc;
use libsql::{Connection, TransactionBehavior, params};

use crate::{
    Storage, col_opt_str, col_opt_ts, col_str, col_ts, col_u32, db_err, from_json, to_json, ts,
};

const RUN_COLUMNS: &str = "id, brand_id, snapshot_id, stage, items_queued, items_completed, \
     guide_json, plan_json, error, superseded_by, started_at, updated_at, completed_at";

const DRAFT_COLUMNS: &str = "id, brand_id, run_id, plan_index, day, platform, topic, body, \
     bfs_score, bfs_breakdown_json, retry_count, status, last_error, created_at, updated_at";

/// A run accepts writes only while it is current and non-terminal.
const RUN_IS_CURRENT: &str = "superseded_by IS NULL AND stage NOT IN ('done', 'failed')";

impl Storage {
    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub async fn insert_snapshot(&self, snapshot: &BrandSnapshot) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO brand_snapshots (id, brand_id, extraction_result_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.id.as_str(),
                    snapshot.brand_id.as_str(),
                    snapshot.extraction_result_ref.as_str(),
                    ts(snapshot.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_snapshot(
        &self,
        brand_id: &str,
        snapshot_id: &str,
    ) -> Result<Option<BrandSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, brand_id, extraction_result_ref, created_at
                 FROM brand_snapshots WHERE id = ?1 AND brand_id = ?2",
                params![snapshot_id, brand_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(BrandSnapshot {
                id: col_str(&row, 0)?,
                brand_id: col_str(&row, 1)?,
                extraction_result_ref: col_str(&row, 2)?,
                created_at: col_ts(&row, 3)?,
            })),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run and supersede every older non-terminal run of the
    /// same brand, atomically. Returns the ids of the superseded runs.
    pub async fn insert_run(&self, run: &OnboardingRun) -> Result<Vec<String>> {
        let conn = self.tx_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;

        let inserted = insert_and_supersede(&tx, run).await;
        match inserted {
            Ok(superseded) => {
                tx.commit().await.map_err(db_err)?;
                Ok(superseded)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(run_id = %run.id, error = %rollback, "run insert rollback failed");
                }
                Err(e)
            }
        }
    }

    pub async fn get_run(&self, brand_id: &str, run_id: &str) -> Result<Option<OnboardingRun>> {
        let sql =
            format!("SELECT {RUN_COLUMNS} FROM onboarding_runs WHERE id = ?1 AND brand_id = ?2");
        let mut rows = self
            .conn
            .query(&sql, params![run_id, brand_id])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// The brand's most recently started run.
    pub async fn latest_run(&self, brand_id: &str) -> Result<Option<OnboardingRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM onboarding_runs WHERE brand_id = ?1
             ORDER BY rowid DESC LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![brand_id])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// Every current, non-terminal run across brands (used for recovery).
    pub async fn list_resumable_runs(&self) -> Result<Vec<OnboardingRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM onboarding_runs WHERE {RUN_IS_CURRENT} ORDER BY rowid"
        );
        let mut rows = self.conn.query(&sql, params![]).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// Move a current run to `stage`, recording `error` when given.
    pub async fn set_run_stage(
        &self,
        run_id: &str,
        stage: RunStage,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = ts(Utc::now());
        let completed_at = stage.is_terminal().then(|| now.clone());
        let sql = format!(
            "UPDATE onboarding_runs
             SET stage = ?1, error = COALESCE(?2, error), updated_at = ?3,
                 completed_at = COALESCE(?4, completed_at)
             WHERE id = ?5 AND {RUN_IS_CURRENT}"
        );
        let changed = self
            .conn
            .execute(
                &sql,
                params![stage.as_str(), error, now.as_str(), completed_at, run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Store the generated guide and advance to `guide_ready`.
    pub async fn set_run_guide(&self, run_id: &str, guide: &BrandGuide) -> Result<bool> {
        let sql = format!(
            "UPDATE onboarding_runs SET guide_json = ?1, stage = 'guide_ready', updated_at = ?2
             WHERE id = ?3 AND {RUN_IS_CURRENT}"
        );
        let changed = self
            .conn
            .execute(&sql, params![to_json(guide)?, ts(Utc::now()), run_id])
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Store the generated plan and advance to `plan_ready`.
    pub async fn set_run_plan(&self, run_id: &str, plan: &ContentPlan) -> Result<bool> {
        let sql = format!(
            "UPDATE onboarding_runs
             SET plan_json = ?1, items_queued = ?2, stage = 'plan_ready', updated_at = ?3
             WHERE id = ?4 AND {RUN_IS_CURRENT}"
        );
        let items = u32::try_from(plan.items.len())
            .map_err(|_| BrandPipeError::Storage("plan too large".into()))?;
        let changed = self
            .conn
            .execute(&sql, params![to_json(plan)?, items, ts(Utc::now()), run_id])
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    pub async fn increment_run_completed(&self, run_id: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE onboarding_runs
             SET items_completed = items_completed + 1, updated_at = ?1
             WHERE id = ?2 AND {RUN_IS_CURRENT}"
        );
        let changed = self
            .conn
            .execute(&sql, params![ts(Utc::now()), run_id])
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    /// Insert a draft if its run is current. An existing draft for the same
    /// plan slot is left untouched.
    pub async fn insert_draft(&self, draft: &ContentDraft) -> Result<bool> {
        let sql = format!(
            "INSERT INTO content_drafts
               (id, brand_id, run_id, plan_index, day, platform, topic, body,
                retry_count, status, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
             WHERE EXISTS (SELECT 1 FROM onboarding_runs WHERE id = ?3 AND {RUN_IS_CURRENT})
             ON CONFLICT(run_id, plan_index) DO NOTHING"
        );
        let changed = self
            .conn
            .execute(
                &sql,
                params![
                    draft.id.as_str(),
                    draft.brand_id.as_str(),
                    draft.run_id.as_str(),
                    draft.plan_index,
                    draft.day,
                    draft.platform.as_str(),
                    draft.topic.as_str(),
                    draft.body.as_str(),
                    draft.retry_count,
                    draft.status.as_str(),
                    ts(draft.created_at),
                    ts(draft.updated_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Write back a draft's body, score, and status if its run is current.
    pub async fn update_draft(&self, draft: &ContentDraft) -> Result<bool> {
        let breakdown = draft.bfs_breakdown.as_ref().map(to_json).transpose()?;
        let sql = format!(
            "UPDATE content_drafts
             SET body = ?1, bfs_score = ?2, bfs_breakdown_json = ?3, retry_count = ?4,
                 status = ?5, last_error = ?6, updated_at = ?7
             WHERE id = ?8
               AND EXISTS (SELECT 1 FROM onboarding_runs
                           WHERE id = content_drafts.run_id AND {RUN_IS_CURRENT})"
        );
        let changed = self
            .conn
            .execute(
                &sql,
                params![
                    draft.body.as_str(),
                    draft.bfs_score,
                    breakdown,
                    draft.retry_count,
                    draft.status.as_str(),
                    draft.last_error.as_deref(),
                    ts(Utc::now()),
                    draft.id.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Drafts of a run, in plan order.
    pub async fn list_drafts(&self, brand_id: &str, run_id: &str) -> Result<Vec<ContentDraft>> {
        let sql = format!(
            "SELECT {DRAFT_COLUMNS} FROM content_drafts
             WHERE run_id = ?1 AND brand_id = ?2 ORDER BY plan_index"
        );
        let mut rows = self
            .conn
            .query(&sql, params![run_id, brand_id])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_draft(&row)?);
        }
        Ok(results)
    }
}

async fn insert_and_supersede(conn: &Connection, run: &OnboardingRun) -> Result<Vec<String>> {
    conn.execute(
        "INSERT INTO onboarding_runs
           (id, brand_id, snapshot_id, stage, items_queued, items_completed,
            started_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.id.as_str(),
            run.brand_id.as_str(),
            run.snapshot_id.as_str(),
            run.stage.as_str(),
            run.items_queued,
            run.items_completed,
            ts(run.started_at),
            ts(run.updated_at),
        ],
    )
    .await
    .map_err(db_err)?;

    let now = ts(Utc::now());
    let sql = format!(
        "UPDATE onboarding_runs
         SET superseded_by = ?1, stage = 'failed',
             error = 'superseded by run ' || ?1,
             completed_at = ?2, updated_at = ?2
         WHERE brand_id = ?3 AND id != ?1 AND {RUN_IS_CURRENT}
           AND rowid < (SELECT rowid FROM onboarding_runs WHERE id = ?1)
         RETURNING id"
    );
    let mut rows = conn
        .query(&sql, params![run.id.as_str(), now, run.brand_id.as_str()])
        .await
        .map_err(db_err)?;

    let mut superseded = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        superseded.push(col_str(&row, 0)?);
    }
    Ok(superseded)
}

fn row_to_run(row: &libsql::Row) -> Result<OnboardingRun> {
    let stage: String = col_str(row, 3)?;
    Ok(OnboardingRun {
        id: col_str(row, 0)?,
        brand_id: col_str(row, 1)?,
        snapshot_id: col_str(row, 2)?,
        stage: stage.parse().map_err(BrandPipeError::Storage)?,
        items_queued: col_u32(row, 4)?,
        items_completed: col_u32(row, 5)?,
        guide: col_opt_str(row, 6).map(|j| from_json(&j)).transpose()?,
        plan: col_opt_str(row, 7).map(|j| from_json(&j)).transpose()?,
        error: col_opt_str(row, 8),
        superseded_by: col_opt_str(row, 9),
        started_at: col_ts(row, 10)?,
        updated_at: col_ts(row, 11)?,
        completed_at: col_opt_ts(row, 12)?,
    })
}

fn row_to_draft(row: &libsql::Row) -> Result<ContentDraft> {
    let status: String = col_str(row, 11)?;
    Ok(ContentDraft {
        id: col_str(row, 0)?,
        brand_id: col_str(row, 1)?,
        run_id: col_str(row, 2)?,
        plan_index: col_u32(row, 3)?,
        day: col_u32(row, 4)?,
        platform: col_str(row, 5)?,
        topic: col_str(row, 6)?,
        body: col_str(row, 7)?,
        bfs_score: row.get::<f64>(8).ok(),
        bfs_breakdown: col_opt_str(row, 9).map(|j| from_json(&j)).transpose()?,
        retry_count: col_u32(row, 10)?,
        status: status
            .parse::<DraftStatus>()
            .map_err(BrandPipeError::Storage)?,
        last_error: col_opt_str(row, 12),
        created_at: col_ts(row, 13)?,
        updated_at: col_ts(row, 14)?,
    })
}
