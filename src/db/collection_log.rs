use serde::Serialize;
use sqlx::Row;
use tracing::{info, instrument};

use super::core::{from_json_text, now_timestamp, to_json_text, Database};
use crate::TARGET_DB;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectionLog {
    pub id: i64,
    pub status: String,
    pub total_papers: i64,
    pub new_papers: i64,
    pub analyzed_papers: i64,
    pub embedded_papers: i64,
    pub report_id: Option<i64>,
    pub sources: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

/// Counts recorded when a run finishes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CollectionCounts {
    pub total_papers: i64,
    pub new_papers: i64,
    pub analyzed_papers: i64,
    pub embedded_papers: i64,
    pub report_id: Option<i64>,
    pub sources: Vec<String>,
}

impl Database {
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn start_collection_log(&self) -> Result<i64, sqlx::Error> {
        let id = sqlx::query("INSERT INTO collection_logs (status, created_at) VALUES (?1, ?2)")
            .bind(STATUS_RUNNING)
            .bind(now_timestamp())
            .execute(self.pool())
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    /// Moves a running log to `success`, or to `failed` when `error` is set.
    #[instrument(target = "db_query", level = "info", skip(self, counts))]
    pub async fn finish_collection_log(
        &self,
        id: i64,
        counts: &CollectionCounts,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let status = if error.is_some() {
            STATUS_FAILED
        } else {
            STATUS_SUCCESS
        };

        sqlx::query(
            r#"
            UPDATE collection_logs
            SET status = ?1, total_papers = ?2, new_papers = ?3, analyzed_papers = ?4,
                embedded_papers = ?5, report_id = ?6, sources = ?7, error_message = ?8,
                finished_at = ?9
            WHERE id = ?10 AND status = ?11
            "#,
        )
        .bind(status)
        .bind(counts.total_papers)
        .bind(counts.new_papers)
        .bind(counts.analyzed_papers)
        .bind(counts.embedded_papers)
        .bind(counts.report_id)
        .bind(to_json_text(&counts.sources)?)
        .bind(error)
        .bind(now_timestamp())
        .bind(id)
        .bind(STATUS_RUNNING)
        .execute(self.pool())
        .await?;

        info!(target: TARGET_DB, "Collection log {} finished as {}", id, status);
        Ok(())
    }

    pub async fn latest_collection_log(&self) -> Result<Option<CollectionLog>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, status, total_papers, new_papers, analyzed_papers, embedded_papers,
                   report_id, sources, error_message, created_at, finished_at
            FROM collection_logs
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let sources: String = row.try_get("sources")?;
                Ok(Some(CollectionLog {
                    id: row.try_get("id")?,
                    status: row.try_get("status")?,
                    total_papers: row.try_get("total_papers")?,
                    new_papers: row.try_get("new_papers")?,
                    analyzed_papers: row.try_get("analyzed_papers")?,
                    embedded_papers: row.try_get("embedded_papers")?,
                    report_id: row.try_get("report_id")?,
                    sources: from_json_text(Some(&sources)),
                    error_message: row.try_get("error_message")?,
                    created_at: row.try_get("created_at")?,
                    finished_at: row.try_get("finished_at")?,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_running_to_success() {
        let db = Database::in_memory().await.unwrap();
        let id = db.start_collection_log().await.unwrap();
        assert_eq!(
            db.latest_collection_log().await.unwrap().unwrap().status,
            STATUS_RUNNING
        );

        let counts = CollectionCounts {
            total_papers: 10,
            new_papers: 4,
            sources: vec!["biorxiv".to_string()],
            ..Default::default()
        };
        db.finish_collection_log(id, &counts, None).await.unwrap();

        let log = db.latest_collection_log().await.unwrap().unwrap();
        assert_eq!(log.status, STATUS_SUCCESS);
        assert_eq!(log.new_papers, 4);
        assert_eq!(log.sources, vec!["biorxiv".to_string()]);
        assert!(log.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_log_transitions_once() {
        let db = Database::in_memory().await.unwrap();
        let id = db.start_collection_log().await.unwrap();
        db.finish_collection_log(id, &CollectionCounts::default(), Some("boom"))
            .await
            .unwrap();
        db.finish_collection_log(id, &CollectionCounts::default(), None)
            .await
            .unwrap();

        let log = db.latest_collection_log().await.unwrap().unwrap();
        assert_eq!(log.status, STATUS_FAILED);
        assert_eq!(log.error_message.as_deref(), Some("boom"));
    }
}
