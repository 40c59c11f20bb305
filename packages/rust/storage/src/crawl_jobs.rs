//! Crawl job rows.
//!
//! Every transition is a single atomic statement guarded on the current
//! state and lease holder, so concurrent workers never observe a torn lease.

use brandpipe_shared::{CrawlJob, JobState, Result};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::{Storage, col_opt_str, col_opt_ts, col_str, col_ts, col_u32, db_err, ts};

const JOB_COLUMNS: &str = "id, brand_id, target_url, state, attempts, worker_id, created_at, \
     started_at, heartbeat_at, completed_at, error, result_ref";

impl Storage {
    pub(crate) async fn insert_crawl_job(&self, job: &CrawlJob) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO crawl_jobs (id, brand_id, target_url, state, attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.id.as_str(),
                    job.brand_id.as_str(),
                    job.target_url.as_str(),
                    job.state.as_str(),
                    job.attempts,
                    ts(job.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Move abandoned leases that have used every attempt to `timed_out`.
    pub(crate) async fn expire_crawl_jobs(
        &self,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<u64> {
        self.conn
            .execute(
                "UPDATE crawl_jobs
                 SET state = 'timed_out', completed_at = ?1, worker_id = NULL,
                     error = 'lease expired after ' || attempts || ' attempts'
                 WHERE state = 'running'
                   AND COALESCE(heartbeat_at, started_at) < ?2
                   AND attempts >= ?3",
                params![ts(now), ts(cutoff), max_attempts],
            )
            .await
            .map_err(db_err)
    }

    /// Claim the oldest eligible job for `worker_id`.
    ///
    /// Eligible: `queued`, or `running` with a lease older than `cutoff` and
    /// attempts left. A worker that already holds a live lease gets nothing.
    pub(crate) async fn lease_crawl_job(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Option<CrawlJob>> {
        let sql = format!(
            "UPDATE crawl_jobs
             SET state = 'running', worker_id = ?1, started_at = ?2,
                 heartbeat_at = NULL, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM crawl_jobs
                 WHERE state = 'queued'
                    OR (state = 'running'
                        AND COALESCE(heartbeat_at, started_at) < ?3
                        AND attempts < ?4)
                 ORDER BY created_at, rowid
                 LIMIT 1
             )
             AND NOT EXISTS (
                 SELECT 1 FROM crawl_jobs
                 WHERE state = 'running' AND worker_id = ?1
                   AND COALESCE(heartbeat_at, started_at) >= ?3
             )
             RETURNING {JOB_COLUMNS}"
        );

        let mut rows = self
            .conn
            .query(&sql, params![worker_id, ts(now), ts(cutoff), max_attempts])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn heartbeat_crawl_job(
        &self,
        job_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE crawl_jobs SET heartbeat_at = ?1
                 WHERE id = ?2 AND state = 'running' AND worker_id = ?3",
                params![ts(now), job_id, worker_id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    pub(crate) async fn complete_crawl_job(
        &self,
        job_id: &str,
        worker_id: &str,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CrawlJob>> {
        let sql = format!(
            "UPDATE crawl_jobs
             SET state = 'succeeded', result_ref = ?1, completed_at = ?2, error = NULL
             WHERE id = ?3 AND state = 'running' AND worker_id = ?4
             RETURNING {JOB_COLUMNS}"
        );
        let mut rows = self
            .conn
            .query(&sql, params![result_ref, ts(now), job_id, worker_id])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Re-queue or terminally fail a job owned by `worker_id`.
    /// Returns the resulting state, or `None` if the worker no longer owns it.
    pub(crate) async fn fail_crawl_job(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retryable: bool,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<JobState>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE crawl_jobs
                 SET state = CASE WHEN ?1 = 1 AND attempts < ?2 THEN 'queued' ELSE 'failed' END,
                     completed_at = CASE WHEN ?1 = 1 AND attempts < ?2 THEN NULL ELSE ?3 END,
                     worker_id = NULL,
                     heartbeat_at = NULL,
                     error = ?4
                 WHERE id = ?5 AND state = 'running' AND worker_id = ?6
                 RETURNING state",
                params![
                    i64::from(retryable),
                    max_attempts,
                    ts(now),
                    error,
                    job_id,
                    worker_id
                ],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let state = col_str(&row, 0)?;
                Ok(Some(parse_state(&state)?))
            }
            None => Ok(None),
        }
    }

    /// Brand-scoped job lookup.
    pub(crate) async fn get_crawl_job(&self, brand_id: &str, job_id: &str) -> Result<Option<CrawlJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = ?1 AND brand_id = ?2");
        let mut rows = self
            .conn
            .query(&sql, params![job_id, brand_id])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }
}

fn parse_state(s: &str) -> Result<JobState> {
    s.parse()
        .map_err(|e: String| brandpipe_shared::BrandPipeError::Storage(e))
}

/// Convert a database row (in `JOB_COLUMNS` order) to a [`CrawlJob`].
fn row_to_job(row: &libsql::Row) -> Result<CrawlJob> {
    Ok(CrawlJob {
        id: col_str(row, 0)?,
        brand_id: col_str(row, 1)?,
        target_url: col_str(row, 2)?,
        state: parse_state(&col_str(row, 3)?)?,
        attempts: col_u32(row, 4)?,
        worker_id: col_opt_str(row, 5),
        created_at: col_ts(row, 6)?,
        started_at: col_opt_ts(row, 7)?,
        heartbeat_at: col_opt_ts(row, 8)?,
        completed_at: col_opt_ts(row, 9)?,
        error: col_opt_str(row, 10),
        result_ref: col_opt_str(row, 11),
    })
}
