use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::cache::{cache_key, AnalysisCache};
use crate::error::{FlywheelError, Result};
use crate::llm::PaperAnalyzer;
use crate::paper::{Paper, TokenUsage};
use crate::TARGET_LLM_REQUEST;

pub const DEFAULT_ANALYSIS_CONCURRENCY: usize = 3;
pub const MISSING_INPUT_ERROR: &str = "missing title or abstract";

#[derive(Clone, Copy, Debug)]
pub struct BatchOptions {
    pub max_concurrent: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            max_concurrent: DEFAULT_ANALYSIS_CONCURRENCY,
            continue_on_error: true,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    /// Already analyzed, or served from the cache.
    Cached,
    /// Dry run; no call made.
    Skipped,
    Analyzed { token_usage: Option<TokenUsage> },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchItem {
    pub paper: Paper,
    #[serde(flatten)]
    pub status: BatchStatus,
}

impl BatchItem {
    fn new(paper: Paper, status: BatchStatus) -> Self {
        BatchItem { paper, status }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.status, BatchStatus::Cached)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, BatchStatus::Skipped)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            BatchStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// True when the paper now carries an analysis the store may not have yet.
    pub fn has_new_analysis(&self) -> bool {
        matches!(self.status, BatchStatus::Analyzed { .. })
            || (self.is_cached() && self.paper.is_analyzed())
    }
}

/// Analyzes `papers` with at most `max_concurrent` calls in flight.
///
/// The output has exactly one item per input, in input order. Papers already analyzed or
/// found in `cache` are returned as `Cached` without a call; with `dry_run` the rest are
/// `Skipped`. A failed paper becomes `Failed` when `continue_on_error`, otherwise the
/// first failure is returned and in-flight calls are dropped.
pub async fn analyze_papers_batch(
    analyzer: &dyn PaperAnalyzer,
    cache: &AnalysisCache,
    papers: Vec<Paper>,
    options: &BatchOptions,
) -> Result<Vec<BatchItem>> {
    let total = papers.len();
    let mut slots: Vec<Option<BatchItem>> = vec![None; total];
    let mut pending = Vec::new();

    for (index, mut paper) in papers.into_iter().enumerate() {
        if paper.is_analyzed() {
            slots[index] = Some(BatchItem::new(paper, BatchStatus::Cached));
            continue;
        }
        let key = cache_key(&paper);
        if let Some(hit) = key.as_deref().and_then(|key| cache.get(key)) {
            paper.apply_analysis(&hit);
            slots[index] = Some(BatchItem::new(paper, BatchStatus::Cached));
            continue;
        }
        if options.dry_run {
            slots[index] = Some(BatchItem::new(paper, BatchStatus::Skipped));
            continue;
        }
        pending.push((index, key, paper));
    }

    let queued = pending.len();
    debug!(target: TARGET_LLM_REQUEST, "{} of {} papers need analysis", queued, total);

    let mut results = stream::iter(pending)
        .map(|(index, key, paper)| async move {
            if paper.title.trim().is_empty() || paper.abstract_text().is_none() {
                return (index, paper, Err(FlywheelError::Validation(MISSING_INPUT_ERROR.to_string())));
            }
            let outcome = analyzer
                .analyze_paper(&paper.title, paper.abstract_text().unwrap_or_default())
                .await
                .map(|analysis| {
                    if let Some(key) = key {
                        cache.insert(key, analysis.clone());
                    }
                    analysis
                });
            (index, paper, outcome)
        })
        .buffer_unordered(options.max_concurrent.max(1));

    let mut failed = 0;
    while let Some((index, mut paper, outcome)) = results.next().await {
        let status = match outcome {
            Ok(analysis) => {
                paper.apply_analysis(&analysis);
                BatchStatus::Analyzed {
                    token_usage: analysis.token_usage,
                }
            }
            Err(FlywheelError::Validation(message)) => {
                warn!(target: TARGET_LLM_REQUEST, "Skipping paper '{}': {}", paper.title, message);
                failed += 1;
                BatchStatus::Failed { error: message }
            }
            Err(e) if options.continue_on_error => {
                warn!(target: TARGET_LLM_REQUEST, "Analysis failed for '{}': {}", paper.title, e);
                failed += 1;
                BatchStatus::Failed { error: e.to_string() }
            }
            Err(e) => {
                error!(target: TARGET_LLM_REQUEST, "Analysis failed for '{}', aborting batch: {}", paper.title, e);
                return Err(e);
            }
        };
        slots[index] = Some(BatchItem::new(paper, status));
    }

    info!(
        target: TARGET_LLM_REQUEST,
        "Analysis batch: {} papers, {} sent, {} failed",
        total,
        queued,
        failed
    );
    Ok(slots.into_iter().flatten().collect())
}
