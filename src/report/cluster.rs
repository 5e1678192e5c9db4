//! Compact paper projection, theme clusters and day statistics.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::db::report::NewCluster;
use crate::paper::{Paper, HIGH_VALUE_SCORE};

const UNKNOWN: &str = "Unknown";
const CLUSTER_FINDINGS: usize = 5;

/// What the report prompt sees of one paper.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompactPaper {
    pub id: i64,
    pub title: String,
    pub taxa: Option<String>,
    pub evolutionary_scale: Option<String>,
    pub research_method: Option<String>,
    pub key_findings: Vec<String>,
    pub evolutionary_mechanism: Option<String>,
    pub importance_score: i64,
    pub innovation_summary: Option<String>,
    pub journal: Option<String>,
    pub doi: Option<String>,
}

impl From<&Paper> for CompactPaper {
    fn from(paper: &Paper) -> Self {
        CompactPaper {
            id: paper.id.unwrap_or_default(),
            title: paper.title.clone(),
            taxa: paper.taxa.clone(),
            evolutionary_scale: paper.evolutionary_scale.as_ref().map(|s| s.as_str().to_string()),
            research_method: paper.research_method.as_ref().map(|m| m.as_str().to_string()),
            key_findings: paper.key_findings.clone().unwrap_or_default(),
            evolutionary_mechanism: paper
                .evolutionary_mechanism
                .as_ref()
                .map(|m| m.as_str().to_string()),
            importance_score: paper.importance_score.unwrap_or_default(),
            innovation_summary: paper.innovation_summary.clone(),
            journal: paper.journal.clone(),
            doi: paper.doi().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub total: usize,
    pub high_value: usize,
    pub unique_taxa: usize,
    pub unique_methods: usize,
    pub cluster_count: usize,
}

pub type Clusters = BTreeMap<String, Vec<CompactPaper>>;

/// `"<taxa>_<method>"` with spaces as underscores; missing parts read `Unknown`.
pub fn cluster_key(paper: &CompactPaper) -> String {
    format!(
        "{}_{}",
        paper.taxa.as_deref().unwrap_or(UNKNOWN),
        paper.research_method.as_deref().unwrap_or(UNKNOWN)
    )
    .replace(' ', "_")
}

pub fn cluster_papers(papers: &[CompactPaper]) -> Clusters {
    let mut clusters = Clusters::new();
    for paper in papers {
        clusters.entry(cluster_key(paper)).or_default().push(paper.clone());
    }
    clusters
}

pub fn compute_stats(papers: &[CompactPaper], clusters: &Clusters) -> ReportStats {
    let taxa: BTreeSet<_> = papers.iter().filter_map(|p| p.taxa.as_deref()).collect();
    let methods: BTreeSet<_> = papers.iter().filter_map(|p| p.research_method.as_deref()).collect();
    ReportStats {
        total: papers.len(),
        high_value: papers
            .iter()
            .filter(|p| p.importance_score >= HIGH_VALUE_SCORE)
            .count(),
        unique_taxa: taxa.len(),
        unique_methods: methods.len(),
        cluster_count: clusters.len(),
    }
}

/// One stored cluster row per group, with a templated summary.
pub fn cluster_rows(clusters: &Clusters) -> Vec<NewCluster> {
    clusters
        .iter()
        .map(|(name, papers)| {
            let mean = papers.iter().map(|p| p.importance_score as f64).sum::<f64>()
                / papers.len().max(1) as f64;
            let first = papers.first();
            let taxa = first.and_then(|p| p.taxa.as_deref()).unwrap_or(UNKNOWN);
            let method = first.and_then(|p| p.research_method.as_deref()).unwrap_or(UNKNOWN);
            NewCluster {
                cluster_name: name.clone(),
                paper_ids: papers.iter().map(|p| p.id).collect(),
                cluster_summary: format!(
                    "{} paper(s) on {} using {} methods, mean importance {:.1}.",
                    papers.len(),
                    taxa,
                    method,
                    mean
                ),
                key_findings: papers
                    .iter()
                    .filter_map(|p| p.key_findings.first().cloned())
                    .take(CLUSTER_FINDINGS)
                    .collect(),
            }
        })
        .collect()
}
