//! Deterministic report used when the LLM cannot produce one.

use super::cluster::{CompactPaper, ReportStats};
use super::{Priority, Recommendation, ReportContent, TrendAnalysis};

const RECOMMENDED: usize = 5;
const TOP_IDS: usize = 10;

/// Papers by descending score, ties by ascending id.
fn ranked(papers: &[CompactPaper]) -> Vec<&CompactPaper> {
    let mut ranked: Vec<_> = papers.iter().collect();
    ranked.sort_by(|a, b| {
        b.importance_score
            .cmp(&a.importance_score)
            .then(a.id.cmp(&b.id))
    });
    ranked
}

/// The first ten paper ids by score.
pub fn top_paper_ids(papers: &[CompactPaper]) -> Vec<i64> {
    ranked(papers).into_iter().take(TOP_IDS).map(|p| p.id).collect()
}

pub fn fallback_report(report_date: &str, stats: &ReportStats, papers: &[CompactPaper]) -> ReportContent {
    let recommended_papers = ranked(papers)
        .into_iter()
        .take(RECOMMENDED)
        .map(|paper| Recommendation {
            paper_id: paper.id,
            title: paper.title.clone(),
            reason: format!("Importance score {}", paper.importance_score),
            priority: Priority::Interesting,
        })
        .collect();

    ReportContent {
        research_summary: format!(
            "On {} the flywheel analyzed {} evolutionary biology papers, {} of them high value. \
             They cover {} taxa and {} research methods in {} clusters.",
            report_date,
            stats.total,
            stats.high_value,
            stats.unique_taxa,
            stats.unique_methods,
            stats.cluster_count
        ),
        hot_topics: Vec::new(),
        trend_analysis: TrendAnalysis {
            emerging_taxa: format!("{} distinct taxa studied.", stats.unique_taxa),
            methodology_trends: format!("{} distinct research methods used.", stats.unique_methods),
            cross_disciplinary_insights: "Not available for this report.".to_string(),
        },
        recommended_papers,
        forward_look: "An automated synthesis was not available; see the recommended papers.".to_string(),
        top_paper_ids: Some(top_paper_ids(papers)),
    }
}
