//! Doubles and fixtures shared by the unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::{FlywheelError, Result};
use crate::llm::{ChatBackend, ChatReply, ChatRequest, PaperAnalyzer};
use crate::paper::{
    AnalysisResult, EvolutionaryMechanism, EvolutionaryScale, Paper, ResearchMethod, TokenUsage,
};
use crate::vector::{GetResponse, LocalVectorStore, Metadata, QueryResponse, VectorStore, Where};

pub fn paper_with_doi(doi: &str, title: &str) -> Paper {
    Paper {
        doi: Some(doi.to_string()),
        abstract_text: Some(format!("Abstract for {}", title)),
        publication_date: Some("2024-05-01".to_string()),
        journal: Some("bioRxiv".to_string()),
        source: Some("biorxiv".to_string()),
        ..Paper::new(title)
    }
}

/// Fills every analysis field so the paper counts as analyzed.
pub fn analyzed(mut paper: Paper, taxa: &str, score: i64) -> Paper {
    paper.apply_analysis(&analysis_for(taxa, score));
    paper
}

pub fn analysis_for(taxa: &str, score: i64) -> AnalysisResult {
    AnalysisResult {
        taxa: taxa.to_string(),
        evolutionary_scale: EvolutionaryScale::Population,
        research_method: ResearchMethod::Experimental,
        key_findings: vec![
            format!("{} adapts quickly", taxa),
            "Selection is strong".to_string(),
            "Gene flow is limited".to_string(),
        ],
        evolutionary_mechanism: EvolutionaryMechanism::NaturalSelection,
        importance_score: score,
        innovation_summary: format!("New insight into {}.", taxa),
        token_usage: None,
    }
}

/// A well-formed fenced analysis reply, with narrative around it.
pub fn analysis_reply(taxa: &str, score: i64) -> String {
    let body = json!({
        "taxa": taxa,
        "evolutionary_scale": "population",
        "research_method": "experimental",
        "key_findings": ["first finding", "second finding", "third finding"],
        "evolutionary_mechanism": "natural-selection",
        "importance_score": score,
        "innovation_summary": "Something new."
    });
    format!("Here is the analysis:\n```json\n{}\n```\nDone.", body)
}

/// Deterministic, never-zero vector derived from the text bytes.
pub struct MockEmbedder {
    dimension: usize,
    delay: Option<fn(&str) -> Duration>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        MockEmbedder {
            dimension,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: fn(&str) -> Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % dimension] += byte as f32 / 255.0;
        }
        vector[0] += 1.0;
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(text)).await;
        }
        if text.contains("fail") {
            return Err(FlywheelError::Upstream("embedding service unavailable".into()));
        }
        Ok(Self::vector_for(text, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Wraps the local store and counts queries.
pub struct CountingVectorStore {
    inner: LocalVectorStore,
    queries: AtomicUsize,
}

impl CountingVectorStore {
    pub fn new(inner: LocalVectorStore) -> Self {
        CountingVectorStore {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for CountingVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Metadata,
        document: Option<String>,
    ) -> Result<()> {
        self.inner.upsert(id, vector, metadata, document).await
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&Where>) -> Result<QueryResponse> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, k, filter).await
    }

    async fn get(&self, ids: &[String]) -> Result<GetResponse> {
        self.inner.get(ids).await
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.inner.delete(ids).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Replies from a fixed script; an exhausted script is an upstream failure.
pub struct ScriptedChat {
    script: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(script: Vec<Result<String>>) -> Self {
        ScriptedChat {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatReply {
                content,
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 20,
                    total_tokens: 30,
                }),
            }),
            Some(Err(e)) => Err(e),
            None => Err(FlywheelError::Upstream("script exhausted".into())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Analyzer whose taxa echo the title. Tracks calls and peak concurrency.
pub struct MockAnalyzer {
    delay: Option<fn(&str) -> Duration>,
    fail_title: Option<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        MockAnalyzer {
            delay: None,
            fail_title: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: fn(&str) -> Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, title: &str) -> Self {
        self.fail_title = Some(title.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaperAnalyzer for MockAnalyzer {
    async fn analyze_paper(&self, title: &str, _abstract_text: &str) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(title)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_title.as_deref() == Some(title) {
            return Err(FlywheelError::ApiExhausted {
                attempts: 3,
                last_error: "scripted failure".into(),
            });
        }
        let mut analysis = analysis_for(title, 70);
        analysis.token_usage = Some(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });
        Ok(analysis)
    }
}
