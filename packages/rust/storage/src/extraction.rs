//! Extraction result rows.

use brandpipe_shared::{ExtractionResult, Result, new_id};
use libsql::params;

use crate::{Storage, col_str, db_err, from_json, to_json, ts};

impl Storage {
    /// Persist an extraction result for a job. Returns the result reference.
    pub async fn insert_extraction_result(
        &self,
        job_id: &str,
        result: &ExtractionResult,
    ) -> Result<String> {
        let id = new_id();
        let json = to_json(result)?;
        self.conn
            .execute(
                "INSERT INTO extraction_results
                   (id, brand_id, job_id, source_url, detected_host, content_hash, result_json, extracted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.as_str(),
                    result.brand_id.as_str(),
                    job_id,
                    result.source_url.as_str(),
                    result.detected_host.as_str(),
                    result.content_hash.as_str(),
                    json,
                    ts(result.extracted_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Brand-scoped lookup of a stored extraction result.
    pub async fn get_extraction_result(
        &self,
        brand_id: &str,
        result_ref: &str,
    ) -> Result<Option<ExtractionResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM extraction_results WHERE id = ?1 AND brand_id = ?2",
                params![result_ref, brand_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(from_json(&col_str(&row, 0)?)?)),
            None => Ok(None),
        }
    }

    /// Delete a result that no job references, e.g. one written by a worker
    /// that lost its lease. Returns whether a row was removed.
    pub async fn discard_extraction_result(&self, job_id: &str, result_ref: &str) -> Result<bool> {
        let n = self
            .conn
            .execute(
                "DELETE FROM extraction_results
                 WHERE id = ?1 AND job_id = ?2
                   AND NOT EXISTS (SELECT 1 FROM crawl_jobs WHERE result_ref = ?1)",
                params![result_ref, job_id],
            )
            .await
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Result references stored for one job, oldest first.
    pub async fn list_extraction_refs(&self, brand_id: &str, job_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM extraction_results WHERE job_id = ?1 AND brand_id = ?2
                 ORDER BY rowid",
                params![job_id, brand_id],
            )
            .await
            .map_err(db_err)?;

        let mut refs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            refs.push(col_str(&row, 0)?);
        }
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use brandpipe_shared::{CrawlJob, HostKind, HostProfile, JobState, PageMetadata, TextBlock};
    use chrono::Utc;

    use crate::test_support::test_storage;

    use super::*;

    fn sample(brand_id: &str) -> ExtractionResult {
        ExtractionResult {
            brand_id: brand_id.into(),
            source_url: "https://acme.example/".into(),
            text_blocks: vec![TextBlock {
                tag: "p".into(),
                text: "Handmade since 1998.".into(),
            }],
            images: vec![],
            detected_host: HostKind::Wix,
            host_profile: HostProfile {
                host_kind: HostKind::Wix,
                confidence: 0.5,
                signals: vec!["cdn:static.wixstatic.com".into()],
            },
            metadata: PageMetadata::default(),
            content_hash: "abc".into(),
            partial_failures: vec![],
            extracted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn result_is_brand_scoped() {
        let storage = test_storage().await;
        let job = CrawlJob {
            id: new_id(),
            brand_id: "acme".into(),
            target_url: "https://acme.example/".into(),
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
        storage.insert_crawl_job(&job).await.unwrap();

        let result_ref = storage
            .insert_extraction_result(&job.id, &sample("acme"))
            .await
            .expect("insert result");

        let found = storage
            .get_extraction_result("acme", &result_ref)
            .await
            .unwrap()
            .expect("own brand sees result");
        assert_eq!(found.detected_host, HostKind::Wix);
        assert_eq!(found.text_blocks.len(), 1);

        let other = storage
            .get_extraction_result("globex", &result_ref)
            .await
            .unwrap();
        assert!(other.is_none());
    }
}
