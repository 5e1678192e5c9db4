use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use tracing::{info, instrument};

use super::core::{from_json_text, now_timestamp, to_json_text, Database};
use crate::TARGET_DB;

/// A persisted daily report. `report_content` is the JSON document as written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub id: i64,
    pub report_date: String,
    pub total_papers: i64,
    pub high_value_papers: i64,
    pub top_paper_ids: Vec<i64>,
    pub report_content: Value,
    pub created_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperCluster {
    pub id: i64,
    pub report_id: i64,
    pub cluster_name: String,
    pub paper_ids: Vec<i64>,
    pub cluster_summary: Option<String>,
    pub key_findings: Vec<String>,
}

/// A report about to be written.
#[derive(Clone, Debug)]
pub struct NewReport {
    pub report_date: String,
    pub total_papers: i64,
    pub high_value_papers: i64,
    pub top_paper_ids: Vec<i64>,
    pub report_content: String,
}

#[derive(Clone, Debug)]
pub struct NewCluster {
    pub cluster_name: String,
    pub paper_ids: Vec<i64>,
    pub cluster_summary: String,
    pub key_findings: Vec<String>,
}

fn report_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DailyReport, sqlx::Error> {
    let raw_content: String = row.try_get("report_content")?;
    let raw_ids: String = row.try_get("top_paper_ids")?;
    Ok(DailyReport {
        id: row.try_get("id")?,
        report_date: row.try_get("report_date")?,
        total_papers: row.try_get("total_papers")?,
        high_value_papers: row.try_get("high_value_papers")?,
        top_paper_ids: from_json_text(Some(&raw_ids)),
        report_content: serde_json::from_str(&raw_content).unwrap_or(Value::String(raw_content)),
        created_at: row.try_get("created_at")?,
    })
}

const REPORT_COLUMNS: &str =
    "id, report_date, total_papers, high_value_papers, top_paper_ids, report_content, created_at";

impl Database {
    /// Writes a report and its clusters in one transaction. Returns the report id.
    #[instrument(target = "db_query", level = "info", skip(self, report, clusters), fields(date = %report.report_date))]
    pub async fn save_report_with_clusters(
        &self,
        report: &NewReport,
        clusters: &[NewCluster],
    ) -> Result<i64, sqlx::Error> {
        let top_ids = to_json_text(&report.top_paper_ids)?;
        let mut transaction = self.pool().begin().await?;

        let report_id = sqlx::query(
            r#"
            INSERT INTO daily_reports (report_date, total_papers, high_value_papers,
                top_paper_ids, report_content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&report.report_date)
        .bind(report.total_papers)
        .bind(report.high_value_papers)
        .bind(&top_ids)
        .bind(&report.report_content)
        .bind(now_timestamp())
        .execute(&mut *transaction)
        .await?
        .last_insert_rowid();

        for cluster in clusters {
            sqlx::query(
                r#"
                INSERT INTO paper_clusters (report_id, cluster_name, paper_ids, cluster_summary, key_findings)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(report_id)
            .bind(&cluster.cluster_name)
            .bind(to_json_text(&cluster.paper_ids)?)
            .bind(&cluster.cluster_summary)
            .bind(to_json_text(&cluster.key_findings)?)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        info!(target: TARGET_DB, "Saved report {} for {} with {} clusters", report_id, report.report_date, clusters.len());

        Ok(report_id)
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<DailyReport>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM daily_reports WHERE id = ?1",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    /// The most recent report written for `report_date` (highest id).
    pub async fn latest_report_for(
        &self,
        report_date: &str,
    ) -> Result<Option<DailyReport>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM daily_reports WHERE report_date = ?1 ORDER BY id DESC LIMIT 1",
            REPORT_COLUMNS
        ))
        .bind(report_date)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    pub async fn latest_report(&self) -> Result<Option<DailyReport>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM daily_reports ORDER BY id DESC LIMIT 1",
            REPORT_COLUMNS
        ))
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    /// Report history, newest first.
    pub async fn list_reports(&self, limit: i64) -> Result<Vec<DailyReport>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM daily_reports ORDER BY id DESC LIMIT ?1",
            REPORT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(report_from_row).collect()
    }

    pub async fn clusters_for_report(
        &self,
        report_id: i64,
    ) -> Result<Vec<PaperCluster>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, report_id, cluster_name, paper_ids, cluster_summary, key_findings
            FROM paper_clusters
            WHERE report_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(report_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let paper_ids: String = row.try_get("paper_ids")?;
                let key_findings: String = row.try_get("key_findings")?;
                Ok(PaperCluster {
                    id: row.try_get("id")?,
                    report_id: row.try_get("report_id")?,
                    cluster_name: row.try_get("cluster_name")?,
                    paper_ids: from_json_text(Some(&paper_ids)),
                    cluster_summary: row.try_get("cluster_summary")?,
                    key_findings: from_json_text(Some(&key_findings)),
                })
            })
            .collect()
    }
}
