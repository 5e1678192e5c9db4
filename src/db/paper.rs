use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use urlnorm::UrlNormalizer;

use super::core::{from_json_text, now_timestamp, to_json_text, Database, DbLockErrorExt};
use crate::paper::{AnalysisResult, Paper};
use crate::TARGET_DB;

const PAPER_COLUMNS: &str = "id, doi, title, authors, abstract, url, publication_date, journal, \
     source, taxa, evolutionary_scale, research_method, evolutionary_mechanism, key_findings, \
     innovation_summary, importance_score, embedded, embedding_id, created_at";

/// SQL rendition of `Paper::is_analyzed`.
const ANALYZED_SQL: &str = "(taxa IS NOT NULL AND evolutionary_scale IS NOT NULL \
     AND research_method IS NOT NULL AND evolutionary_mechanism IS NOT NULL \
     AND innovation_summary IS NOT NULL AND importance_score > 0 \
     AND key_findings IS NOT NULL AND key_findings NOT IN ('', '[]'))";

/// Papers that failed analysis this many times stay out of the analysis queue.
pub const MAX_ANALYSIS_ATTEMPTS: i64 = 3;
/// Papers that failed embedding this many times stay out of the embedding queue.
pub const MAX_EMBEDDING_ATTEMPTS: i64 = 3;

/// Upper bound on ids the hybrid-search prefilter hands to the vector store.
pub const MAX_PREFILTER_IDS: i64 = 500;

/// A persisted paper row, before projection into `Paper`.
#[derive(Debug, sqlx::FromRow)]
struct PaperRow {
    id: i64,
    doi: Option<String>,
    title: String,
    authors: String,
    #[sqlx(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
    publication_date: Option<String>,
    journal: Option<String>,
    source: Option<String>,
    taxa: Option<String>,
    evolutionary_scale: Option<String>,
    research_method: Option<String>,
    evolutionary_mechanism: Option<String>,
    key_findings: Option<String>,
    innovation_summary: Option<String>,
    importance_score: Option<i64>,
    embedded: bool,
    embedding_id: Option<String>,
    created_at: String,
}

impl From<PaperRow> for Paper {
    fn from(row: PaperRow) -> Self {
        Paper {
            id: Some(row.id),
            doi: row.doi,
            title: row.title,
            authors: from_json_text(Some(&row.authors)),
            abstract_text: row.abstract_text,
            url: row.url,
            publication_date: row.publication_date,
            journal: row.journal,
            source: row.source,
            taxa: row.taxa,
            evolutionary_scale: row.evolutionary_scale.map(Into::into),
            research_method: row.research_method.map(Into::into),
            evolutionary_mechanism: row.evolutionary_mechanism.map(Into::into),
            key_findings: row
                .key_findings
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            innovation_summary: row.innovation_summary,
            importance_score: row.importance_score,
            embedded: row.embedded,
            embedding_id: row.embedding_id,
            created_at: Some(row.created_at),
        }
    }
}

/// Metadata filter shared by paper listing and the hybrid-search prefilter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PaperFilter {
    pub taxa: Option<String>,
    pub min_score: Option<i64>,
    pub journal: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    #[serde(default)]
    pub analyzed_only: bool,
}

impl PaperFilter {
    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(taxa) = self.taxa.as_deref().filter(|t| !t.trim().is_empty()) {
            qb.push(" AND taxa LIKE ")
                .push_bind(format!("%{}%", taxa.trim()));
        }
        if let Some(min_score) = self.min_score {
            qb.push(" AND importance_score >= ").push_bind(min_score);
        }
        if let Some(journal) = self.journal.as_deref().filter(|j| !j.trim().is_empty()) {
            qb.push(" AND journal LIKE ")
                .push_bind(format!("%{}%", journal.trim()));
        }
        if let Some(from) = self.date_from.as_deref().filter(|d| !d.is_empty()) {
            qb.push(" AND publication_date >= ").push_bind(from.to_string());
        }
        if let Some(to) = self.date_to.as_deref().filter(|d| !d.is_empty()) {
            qb.push(" AND publication_date <= ").push_bind(to.to_string());
        }
        if self.analyzed_only {
            qb.push(" AND ").push(ANALYZED_SQL);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PaperStats {
    pub total: i64,
    pub analyzed: i64,
    pub embedded: i64,
    pub high_value: i64,
}

/// Normalizes a URL for duplicate detection; `None` for unparsable URLs.
pub fn normalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let normalizer = UrlNormalizer::default();
    Some(normalizer.compute_normalization_string(&parsed))
}

impl Database {
    /// Inserts a paper, returning its new id, or `None` when a paper with the same DOI
    /// already exists.
    #[instrument(target = "db_query", level = "info", skip(self, paper), fields(title = %paper.title))]
    pub async fn insert_paper(&self, paper: &Paper) -> Result<Option<i64>, sqlx::Error> {
        let authors = to_json_text(&paper.authors)?;
        let key_findings = match &paper.key_findings {
            Some(findings) => Some(to_json_text(findings)?),
            None => None,
        };
        let normalized_url = paper.url.as_deref().and_then(normalize_url);
        let created_at = paper.created_at.clone().unwrap_or_else(now_timestamp);

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            let result = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO papers (doi, title, authors, abstract, url, normalized_url,
                    publication_date, journal, source, taxa, evolutionary_scale, research_method,
                    evolutionary_mechanism, key_findings, innovation_summary, importance_score,
                    embedded, embedding_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                ON CONFLICT(doi) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(paper.doi())
            .bind(&paper.title)
            .bind(&authors)
            .bind(&paper.abstract_text)
            .bind(&paper.url)
            .bind(&normalized_url)
            .bind(&paper.publication_date)
            .bind(&paper.journal)
            .bind(&paper.source)
            .bind(&paper.taxa)
            .bind(paper.evolutionary_scale.as_ref().map(|v| v.as_str().to_string()))
            .bind(paper.research_method.as_ref().map(|v| v.as_str().to_string()))
            .bind(paper.evolutionary_mechanism.as_ref().map(|v| v.as_str().to_string()))
            .bind(&key_findings)
            .bind(&paper.innovation_summary)
            .bind(paper.importance_score)
            .bind(paper.embedded)
            .bind(&paper.embedding_id)
            .bind(&created_at)
            .fetch_optional(self.pool())
            .await;

            match result {
                Ok(id) => {
                    debug!(target: TARGET_DB, "Paper insert for '{}' returned {:?}", paper.title, id);
                    return Ok(id);
                }
                Err(err) if err.is_database_lock_error() => {
                    info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}", backoff, attempt, max_retries);
                    // Jitter keeps concurrent writers from retrying in lockstep.
                    let jitter = rand::rng().random_range(0..200);
                    sleep(Duration::from_millis(backoff + jitter)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to add paper '{}': {}", paper.title, err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for adding paper".into(),
        ))
    }

    /// True if a stored paper has the same DOI or the same normalized URL.
    pub async fn paper_exists(
        &self,
        doi: Option<&str>,
        url: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        if let Some(doi) = doi.map(str::trim).filter(|d| !d.is_empty()) {
            let row = sqlx::query("SELECT 1 FROM papers WHERE doi = ?1")
                .bind(doi)
                .fetch_optional(self.pool())
                .await?;
            if row.is_some() {
                return Ok(true);
            }
        }

        if let Some(normalized) = url.and_then(normalize_url) {
            let row = sqlx::query("SELECT 1 FROM papers WHERE normalized_url = ?1")
                .bind(&normalized)
                .fetch_optional(self.pool())
                .await?;
            return Ok(row.is_some());
        }

        Ok(false)
    }

    /// Persists the papers not already in the store. Returns the inserted papers with ids.
    pub async fn insert_new_papers(&self, papers: &[Paper]) -> Result<Vec<Paper>, sqlx::Error> {
        let mut inserted = Vec::new();
        for paper in papers {
            if self
                .paper_exists(paper.doi(), paper.url.as_deref())
                .await?
            {
                debug!(target: TARGET_DB, "Skipping already stored paper: {}", paper.title);
                continue;
            }
            match self.insert_paper(paper).await? {
                Some(id) => {
                    let mut stored = paper.clone();
                    stored.id = Some(id);
                    inserted.push(stored);
                }
                None => debug!(target: TARGET_DB, "DOI conflict on insert, skipping: {}", paper.title),
            }
        }
        info!(target: TARGET_DB, "Stored {} new papers out of {}", inserted.len(), papers.len());
        Ok(inserted)
    }

    pub async fn get_paper(&self, id: i64) -> Result<Option<Paper>, sqlx::Error> {
        let row = sqlx::query_as::<_, PaperRow>(&format!(
            "SELECT {} FROM papers WHERE id = ?1",
            PAPER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Paper::from))
    }

    pub async fn get_paper_by_doi(&self, doi: &str) -> Result<Option<Paper>, sqlx::Error> {
        let row = sqlx::query_as::<_, PaperRow>(&format!(
            "SELECT {} FROM papers WHERE doi = ?1",
            PAPER_COLUMNS
        ))
        .bind(doi.trim())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Paper::from))
    }

    /// Analyzable papers that still fail the analyzed predicate, fewest attempts first, then
    /// oldest. Papers without a title or abstract, or past `MAX_ANALYSIS_ATTEMPTS`, are left out.
    pub async fn unanalyzed_papers(&self, limit: i64) -> Result<Vec<Paper>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PaperRow>(&format!(
            "SELECT {} FROM papers WHERE NOT {} AND TRIM(title) != '' AND abstract IS NOT NULL \
             AND TRIM(abstract) != '' AND analysis_attempts < ?2 \
             ORDER BY analysis_attempts ASC, id ASC LIMIT ?1",
            PAPER_COLUMNS, ANALYZED_SQL
        ))
        .bind(limit)
        .bind(MAX_ANALYSIS_ATTEMPTS)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }

    /// Papers with an abstract that have not been embedded yet, fewest attempts first, then
    /// oldest. Papers past `MAX_EMBEDDING_ATTEMPTS` are left out.
    pub async fn unembedded_papers(&self, limit: i64) -> Result<Vec<Paper>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PaperRow>(&format!(
            "SELECT {} FROM papers WHERE embedded = FALSE AND abstract IS NOT NULL \
             AND TRIM(abstract) != '' AND embedding_attempts < ?2 \
             ORDER BY embedding_attempts ASC, id ASC LIMIT ?1",
            PAPER_COLUMNS
        ))
        .bind(limit)
        .bind(MAX_EMBEDDING_ATTEMPTS)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }

    /// Counts a failed analysis against the paper and keeps the error for inspection.
    pub async fn record_analysis_failure(&self, id: i64, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE papers SET analysis_attempts = analysis_attempts + 1, analysis_error = ?1 \
             WHERE id = ?2",
        )
        .bind(error)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_embedding_failure(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE papers SET embedding_attempts = embedding_attempts + 1 WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    #[instrument(target = "db_query", level = "info", skip(self, analysis))]
    pub async fn update_paper_analysis(
        &self,
        id: i64,
        analysis: &AnalysisResult,
    ) -> Result<(), sqlx::Error> {
        let key_findings = to_json_text(&analysis.key_findings)?;
        let result = sqlx::query(
            r#"
            UPDATE papers
            SET taxa = ?1, evolutionary_scale = ?2, research_method = ?3,
                evolutionary_mechanism = ?4, key_findings = ?5, innovation_summary = ?6,
                importance_score = ?7, analysis_attempts = analysis_attempts + 1,
                analysis_error = NULL
            WHERE id = ?8
            "#,
        )
        .bind(&analysis.taxa)
        .bind(analysis.evolutionary_scale.as_str())
        .bind(analysis.research_method.as_str())
        .bind(analysis.evolutionary_mechanism.as_str())
        .bind(&key_findings)
        .bind(&analysis.innovation_summary)
        .bind(analysis.importance_score)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(target: TARGET_DB, "No paper with id {} to update analysis for", id);
        }
        Ok(())
    }

    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn mark_embedded(&self, id: i64, embedding_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE papers SET embedded = TRUE, embedding_id = ?1 WHERE id = ?2")
            .bind(embedding_id)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Ids of papers matching `filter`, best scores first, at most `limit`.
    pub async fn filter_paper_ids(
        &self,
        filter: &PaperFilter,
        limit: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM papers");
        filter.push_conditions(&mut qb);
        qb.push(" ORDER BY importance_score DESC, id DESC LIMIT ")
            .push_bind(limit);

        qb.build_query_scalar::<i64>()
            .fetch_all(self.pool())
            .await
    }

    /// Paginated listing, newest first.
    pub async fn list_papers(
        &self,
        filter: &PaperFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Paper>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM papers", PAPER_COLUMNS));
        filter.push_conditions(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb
            .build_query_as::<PaperRow>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }

    /// Analyzed papers created in `[start, end)`, highest score first.
    pub async fn analyzed_papers_between(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<Paper>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PaperRow>(&format!(
            "SELECT {} FROM papers WHERE created_at >= ?1 AND created_at < ?2 AND {} \
             ORDER BY importance_score DESC, id ASC",
            PAPER_COLUMNS, ANALYZED_SQL
        ))
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(Paper::from)
            .filter(Paper::is_analyzed)
            .collect())
    }

    pub async fn paper_stats(&self) -> Result<PaperStats, sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
            .fetch_one(self.pool())
            .await?;
        let analyzed: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM papers WHERE {}", ANALYZED_SQL))
                .fetch_one(self.pool())
                .await?;
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers WHERE embedded = TRUE")
            .fetch_one(self.pool())
            .await?;
        let high_value: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM papers WHERE importance_score >= 80")
                .fetch_one(self.pool())
                .await?;

        Ok(PaperStats {
            total,
            analyzed,
            embedded,
            high_value,
        })
    }
}
