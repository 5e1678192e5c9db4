//! Daily deep report: cluster the day's analyzed papers and have the LLM synthesize them.
//!
//! The LLM document is validated against [`ReportContent`] and stored verbatim. Any LLM or
//! parse failure falls back to a deterministic report, so a day with analyzed papers
//! always gets a well-formed report. Only an empty day is an error (`NoData`).

pub mod cluster;
pub mod fallback;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::db::report::NewReport;
use crate::db::Database;
use crate::error::{FlywheelError, Result};
use crate::llm::LlmClient;
use crate::prompt::report_prompt;
use crate::TARGET_FLYWHEEL;

use cluster::{cluster_papers, cluster_rows, compute_stats, CompactPaper};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    MustRead,
    HighlyRecommended,
    Interesting,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HotTopic {
    pub topic: String,
    pub description: String,
    #[serde(default)]
    pub paper_count: i64,
    #[serde(default)]
    pub key_papers: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub emerging_taxa: String,
    pub methodology_trends: String,
    pub cross_disciplinary_insights: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub paper_id: i64,
    pub title: String,
    pub reason: String,
    pub priority: Priority,
}

/// The report document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    pub research_summary: String,
    pub hot_topics: Vec<HotTopic>,
    pub trend_analysis: TrendAnalysis,
    pub recommended_papers: Vec<Recommendation>,
    pub forward_look: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_paper_ids: Option<Vec<i64>>,
}

/// What a synthesis run wrote.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SynthesizedReport {
    pub report_id: i64,
    pub report_date: String,
    pub total_papers: i64,
    pub high_value_papers: i64,
    pub top_paper_ids: Vec<i64>,
    pub clusters: usize,
    pub used_fallback: bool,
    pub content: Value,
}

#[derive(Clone)]
pub struct ReportSynthesizer {
    db: Database,
    llm: LlmClient,
}

impl ReportSynthesizer {
    pub fn new(db: Database, llm: LlmClient) -> Self {
        ReportSynthesizer { db, llm }
    }

    pub async fn synthesize_today(&self) -> Result<SynthesizedReport> {
        self.synthesize(Utc::now().date_naive()).await
    }

    /// Builds and stores the report for papers created on `date`.
    pub async fn synthesize(&self, date: NaiveDate) -> Result<SynthesizedReport> {
        let report_date = date.format("%Y-%m-%d").to_string();
        let next_day = (date + Duration::days(1)).format("%Y-%m-%d").to_string();

        let papers: Vec<CompactPaper> = self
            .db
            .analyzed_papers_between(&report_date, &next_day)
            .await?
            .iter()
            .map(CompactPaper::from)
            .collect();
        if papers.is_empty() {
            return Err(FlywheelError::NoData(format!(
                "no analyzed papers for {}",
                report_date
            )));
        }

        let clusters = cluster_papers(&papers);
        let stats = compute_stats(&papers, &clusters);
        info!(target: TARGET_FLYWHEEL, "Synthesizing report for {}: {} papers in {} clusters", report_date, stats.total, stats.cluster_count);

        let prompt = report_prompt(
            &report_date,
            &serde_json::to_string_pretty(&stats)?,
            &serde_json::to_string_pretty(&clusters)?,
            &serde_json::to_string_pretty(&papers)?,
        );

        let (document, top_paper_ids, used_fallback) = match self.llm_report(&prompt).await {
            Ok((document, content)) => {
                let top = content
                    .top_paper_ids
                    .unwrap_or_else(|| fallback::top_paper_ids(&papers));
                (Value::Object(document), top, false)
            }
            Err(e) => {
                warn!(target: TARGET_FLYWHEEL, "Report synthesis failed, using fallback: {}", e);
                let content = fallback::fallback_report(&report_date, &stats, &papers);
                let top = content.top_paper_ids.clone().unwrap_or_default();
                (serde_json::to_value(&content)?, top, true)
            }
        };

        let record = NewReport {
            report_date: report_date.clone(),
            total_papers: stats.total as i64,
            high_value_papers: stats.high_value as i64,
            top_paper_ids: top_paper_ids.clone(),
            report_content: serde_json::to_string(&document)?,
        };
        let rows = cluster_rows(&clusters);
        let report_id = self.db.save_report_with_clusters(&record, &rows).await?;

        Ok(SynthesizedReport {
            report_id,
            report_date,
            total_papers: record.total_papers,
            high_value_papers: record.high_value_papers,
            top_paper_ids,
            clusters: rows.len(),
            used_fallback,
            content: document,
        })
    }

    /// The raw LLM document plus its typed view. Missing or mistyped fields are a parse error.
    async fn llm_report(&self, prompt: &str) -> Result<(Map<String, Value>, ReportContent)> {
        let document = self.llm.generate_report(prompt).await?;
        let content: ReportContent = serde_json::from_value(Value::Object(document.clone()))
            .map_err(|e| FlywheelError::Parse(format!("report document: {}", e)))?;
        Ok((document, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{analyzed, paper_with_doi, ScriptedChat};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn synthesizer(db: &Database, script: Vec<Result<String>>) -> ReportSynthesizer {
        let llm = LlmClient::new(Arc::new(ScriptedChat::new(script)), 1, StdDuration::from_millis(1));
        ReportSynthesizer::new(db.clone(), llm)
    }

    async fn seed(db: &Database, scores: &[i64]) -> Vec<i64> {
        let mut ids = Vec::new();
        for (i, score) in scores.iter().enumerate() {
            let doi = format!("10.1/{}", i);
            let paper = analyzed(paper_with_doi(&doi, &format!("Paper {}", i)), "Anolis", *score);
            ids.push(db.insert_paper(&paper).await.unwrap().unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let db = Database::in_memory().await.unwrap();
        let ids = seed(&db, &[50, 95, 80]).await;

        let report = synthesizer(&db, vec![Err(FlywheelError::Upstream("down".into()))])
            .synthesize_today()
            .await
            .unwrap();
        assert!(report.used_fallback);

        let stored = db.get_report(report.report_id).await.unwrap().unwrap();
        assert_eq!(stored.total_papers, 3);
        assert_eq!(stored.high_value_papers, 2);
        assert_eq!(&stored.top_paper_ids[..2], &[ids[1], ids[2]]);

        let content: ReportContent = serde_json::from_value(stored.report_content.clone()).unwrap();
        assert!(!content.research_summary.is_empty());
        assert!(content.hot_topics.is_empty());
        assert_eq!(content.recommended_papers.len(), 3);
        assert!(content
            .recommended_papers
            .iter()
            .all(|r| r.priority == Priority::Interesting));
        for key in ["research_summary", "hot_topics", "trend_analysis", "recommended_papers", "forward_look"] {
            assert!(stored.report_content.get(key).is_some(), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_malformed_document_falls_back() {
        let db = Database::in_memory().await.unwrap();
        seed(&db, &[70]).await;
        let report = synthesizer(&db, vec![Ok(r#"{"research_summary": "only this"}"#.to_string())])
            .synthesize_today()
            .await
            .unwrap();
        assert!(report.used_fallback);
    }

    #[tokio::test]
    async fn test_llm_document_stored_verbatim() {
        let db = Database::in_memory().await.unwrap();
        let ids = seed(&db, &[60, 90]).await;
        let document = json!({
            "research_summary": "Lizards everywhere.",
            "hot_topics": [{"topic": "Islands", "description": "Size shifts", "paper_count": 2, "key_papers": ids}],
            "trend_analysis": {
                "emerging_taxa": "Anolis",
                "methodology_trends": "Experiments",
                "cross_disciplinary_insights": "Ecology"
            },
            "recommended_papers": [
                {"paper_id": ids[1], "title": "Paper 1", "reason": "Strong", "priority": "must_read"}
            ],
            "forward_look": "More lizards.",
            "top_paper_ids": [ids[0]],
            "extra_field": true
        });
        let report = synthesizer(&db, vec![Ok(format!("```json\n{}\n```", document))])
            .synthesize_today()
            .await
            .unwrap();

        assert!(!report.used_fallback);
        let stored = db.get_report(report.report_id).await.unwrap().unwrap();
        assert_eq!(stored.report_content, document);
        assert_eq!(stored.top_paper_ids, vec![ids[0]]);

        let clusters = db.clusters_for_report(report.report_id).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_name, "Anolis_experimental");
    }

    #[tokio::test]
    async fn test_empty_day_is_no_data() {
        let db = Database::in_memory().await.unwrap();
        db.insert_paper(&paper_with_doi("10.1/x", "Not analyzed")).await.unwrap();
        let err = synthesizer(&db, vec![]).synthesize_today().await.unwrap_err();
        assert!(matches!(err, FlywheelError::NoData(_)));
        assert!(db.latest_report().await.unwrap().is_none());
    }
}
