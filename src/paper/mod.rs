//! The paper record and its analysis.
//!
//! A `Paper` is what collectors produce and what the store persists. Analysis fields stay
//! `None` until the LLM has classified the paper; `Paper::state` discriminates the two
//! lifecycle variants.

pub mod taxonomy;

use serde::{Deserialize, Serialize};

pub use taxonomy::{EvolutionaryMechanism, EvolutionaryScale, ResearchMethod};

/// Importance score at or above which a paper counts as high value.
pub const HIGH_VALUE_SCORE: i64 = 80;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: Option<i64>,
    pub doi: Option<String>,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub publication_date: Option<String>,
    pub journal: Option<String>,
    pub source: Option<String>,

    pub taxa: Option<String>,
    pub evolutionary_scale: Option<EvolutionaryScale>,
    pub research_method: Option<ResearchMethod>,
    pub evolutionary_mechanism: Option<EvolutionaryMechanism>,
    pub key_findings: Option<Vec<String>>,
    pub innovation_summary: Option<String>,
    pub importance_score: Option<i64>,

    #[serde(default)]
    pub embedded: bool,
    pub embedding_id: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Structured analysis the LLM produces for one paper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub taxa: String,
    pub evolutionary_scale: EvolutionaryScale,
    pub research_method: ResearchMethod,
    pub key_findings: Vec<String>,
    pub evolutionary_mechanism: EvolutionaryMechanism,
    pub importance_score: i64,
    pub innovation_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// Lifecycle variant of a paper with respect to analysis.
#[derive(Clone, Debug, PartialEq)]
pub enum PaperState {
    NeedsAnalysis,
    Analyzed(AnalysisResult),
}

impl Paper {
    pub fn new(title: impl Into<String>) -> Self {
        Paper {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Projects the analysis fields into an `AnalysisResult` when the paper is analyzed:
    /// all seven fields present, a positive score and at least one finding.
    pub fn analysis(&self) -> Option<AnalysisResult> {
        let key_findings = self.key_findings.as_ref()?;
        let importance_score = self.importance_score?;
        if key_findings.is_empty() || importance_score <= 0 {
            return None;
        }

        Some(AnalysisResult {
            taxa: self.taxa.clone()?,
            evolutionary_scale: self.evolutionary_scale.clone()?,
            research_method: self.research_method.clone()?,
            key_findings: key_findings.clone(),
            evolutionary_mechanism: self.evolutionary_mechanism.clone()?,
            importance_score,
            innovation_summary: self.innovation_summary.clone()?,
            token_usage: None,
        })
    }

    pub fn state(&self) -> PaperState {
        match self.analysis() {
            Some(analysis) => PaperState::Analyzed(analysis),
            None => PaperState::NeedsAnalysis,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis().is_some()
    }

    pub fn is_high_value(&self) -> bool {
        self.importance_score.unwrap_or(0) >= HIGH_VALUE_SCORE
    }

    /// Copies an analysis into the paper's analysis fields.
    pub fn apply_analysis(&mut self, analysis: &AnalysisResult) {
        self.taxa = Some(analysis.taxa.clone());
        self.evolutionary_scale = Some(analysis.evolutionary_scale.clone());
        self.research_method = Some(analysis.research_method.clone());
        self.evolutionary_mechanism = Some(analysis.evolutionary_mechanism.clone());
        self.key_findings = Some(analysis.key_findings.clone());
        self.innovation_summary = Some(analysis.innovation_summary.clone());
        self.importance_score = Some(analysis.importance_score);
    }

    pub fn doi(&self) -> Option<&str> {
        self.doi
            .as_deref()
            .map(str::trim)
            .filter(|doi| !doi.is_empty())
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}
