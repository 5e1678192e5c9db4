//! Bounded, order-preserving LLM analysis of paper batches.

pub mod batch;
pub mod cache;

use tracing::{info, warn};

pub use batch::{analyze_papers_batch, BatchItem, BatchOptions, BatchStatus};
pub use cache::{cache_key, AnalysisCache};

use crate::db::Database;
use crate::error::Result;
use crate::llm::PaperAnalyzer;
use crate::paper::TokenUsage;
use crate::TARGET_LLM_REQUEST;

/// Counts from one analysis pass over the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub attempted: usize,
    pub analyzed: usize,
    pub cached: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_tokens: u64,
}

/// Analyzes up to `limit` unanalyzed stored papers and writes the results back.
///
/// Every stored analysis and every failure counts as an attempt on the paper, so papers the
/// analyzer cannot handle drop out of the queue instead of starving the rest.
pub async fn analyze_pending(
    db: &Database,
    analyzer: &dyn PaperAnalyzer,
    cache: &AnalysisCache,
    limit: i64,
    options: &BatchOptions,
) -> Result<AnalysisSummary> {
    let papers = db.unanalyzed_papers(limit).await?;
    let mut summary = AnalysisSummary {
        attempted: papers.len(),
        ..Default::default()
    };
    if papers.is_empty() {
        return Ok(summary);
    }

    for item in analyze_papers_batch(analyzer, cache, papers, options).await? {
        match &item.status {
            BatchStatus::Analyzed { token_usage } => {
                summary.total_tokens += token_usage.map_or(0, |u: TokenUsage| u.total_tokens as u64);
            }
            BatchStatus::Cached => summary.cached += 1,
            BatchStatus::Skipped => summary.skipped += 1,
            BatchStatus::Failed { error } => {
                summary.failed += 1;
                if let Some(id) = item.paper.id {
                    if let Err(e) = db.record_analysis_failure(id, error).await {
                        warn!(target: TARGET_LLM_REQUEST, "Failed to record analysis failure for paper {}: {}", id, e);
                    }
                }
            }
        }
        if !item.has_new_analysis() {
            continue;
        }

        let (Some(id), Some(analysis)) = (item.paper.id, item.paper.analysis()) else {
            continue;
        };
        match db.update_paper_analysis(id, &analysis).await {
            Ok(()) => summary.analyzed += 1,
            Err(e) => {
                warn!(target: TARGET_LLM_REQUEST, "Failed to store analysis for paper {}: {}", id, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        target: TARGET_LLM_REQUEST,
        "Stored {} analyses ({} cached, {} skipped, {} failed, {} tokens)",
        summary.analyzed,
        summary.cached,
        summary.skipped,
        summary.failed,
        summary.total_tokens
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{paper_with_doi, MockAnalyzer};

    #[tokio::test]
    async fn test_analyze_pending_persists_results() {
        let db = Database::in_memory().await.unwrap();
        let mut with_abstract = paper_with_doi("10.1/a", "Cichlid radiation");
        with_abstract.abstract_text = Some("Jaws diversify.".into());
        let mut without_abstract = paper_with_doi("10.1/b", "No abstract");
        without_abstract.abstract_text = None;
        db.insert_new_papers(&[with_abstract, without_abstract]).await.unwrap();

        let analyzer = MockAnalyzer::new();
        let summary = analyze_pending(&db, &analyzer, &AnalysisCache::new(), 10, &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 0);

        let stored = db.get_paper_by_doi("10.1/a").await.unwrap().unwrap();
        assert!(stored.is_analyzed());
        assert_eq!(stored.taxa.as_deref(), Some("Cichlid radiation"));
        assert!(db.unanalyzed_papers(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_papers_do_not_starve_the_queue() {
        let db = Database::in_memory().await.unwrap();
        let mut papers: Vec<_> = (0..3)
            .map(|i| paper_with_doi(&format!("10.1/bad{}", i), "Broken"))
            .collect();
        for i in 0..3 {
            let mut bare = paper_with_doi(&format!("10.1/bare{}", i), "No abstract");
            bare.abstract_text = None;
            papers.push(bare);
        }
        papers.push(paper_with_doi("10.1/good", "Good paper"));
        db.insert_new_papers(&papers).await.unwrap();

        let analyzer = MockAnalyzer::new().failing_on("Broken");
        let cache = AnalysisCache::new();
        for _ in 0..5 {
            analyze_pending(&db, &analyzer, &cache, 3, &BatchOptions::default())
                .await
                .unwrap();
        }

        let good = db.get_paper_by_doi("10.1/good").await.unwrap().unwrap();
        assert!(good.is_analyzed());
        assert!(db.unanalyzed_papers(10).await.unwrap().is_empty());
    }
}
