//! One end-to-end cycle: collect, persist, analyze, embed, report.
//!
//! A failing stage is logged and recorded on the cycle summary, and hands zero to the next
//! stage. The cycle itself still finishes and closes its collection log.

pub mod scheduler;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use scheduler::{Scheduler, SchedulerStatus};

use crate::analysis::{analyze_pending, AnalysisCache, BatchOptions};
use crate::collector::Orchestrator;
use crate::config::Settings;
use crate::db::collection_log::CollectionCounts;
use crate::db::Database;
use crate::embedding::{generate_embeddings, save_embeddings, Embedder};
use crate::error::{FlywheelError, Result};
use crate::llm::PaperAnalyzer;
use crate::report::ReportSynthesizer;
use crate::vector::VectorStore;
use crate::TARGET_FLYWHEEL;

/// Anything the scheduler can fire.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> Result<CycleSummary>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub log_id: Option<i64>,
    pub collected: usize,
    pub new_papers: usize,
    pub analyzed: usize,
    pub embedded: usize,
    pub report_id: Option<i64>,
    pub sources: Vec<String>,
    pub errors: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
}

impl CycleSummary {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Where a cycle gets its collectors from.
#[derive(Clone)]
pub enum CollectorSet {
    /// Rebuilt from the enabled registry entries at the start of every cycle.
    Registry {
        settings: Settings,
        client: reqwest::Client,
    },
    Fixed(Arc<Orchestrator>),
}

#[derive(Clone, Copy, Debug)]
pub struct FlywheelOptions {
    pub analysis: BatchOptions,
    pub embedding_concurrency: usize,
    pub batch_limit: i64,
}

impl FlywheelOptions {
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Self {
        FlywheelOptions {
            analysis: BatchOptions {
                max_concurrent: settings.analysis_concurrency,
                continue_on_error: true,
                dry_run,
            },
            embedding_concurrency: settings.embedding_concurrency,
            batch_limit: settings.analysis_batch_limit,
        }
    }
}

impl Default for FlywheelOptions {
    fn default() -> Self {
        FlywheelOptions {
            analysis: BatchOptions::default(),
            embedding_concurrency: crate::embedding::DEFAULT_EMBEDDING_CONCURRENCY,
            batch_limit: 200,
        }
    }
}

#[derive(Clone)]
pub struct Flywheel {
    pub db: Database,
    pub collectors: CollectorSet,
    pub analyzer: Arc<dyn PaperAnalyzer>,
    pub cache: Arc<AnalysisCache>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorStore>,
    pub reports: ReportSynthesizer,
    pub options: FlywheelOptions,
}

impl Flywheel {
    async fn orchestrator(&self) -> Result<Arc<Orchestrator>> {
        match &self.collectors {
            CollectorSet::Fixed(orchestrator) => Ok(orchestrator.clone()),
            CollectorSet::Registry { settings, client } => Ok(Arc::new(
                Orchestrator::from_registry(&self.db, settings, client.clone()).await?,
            )),
        }
    }

    async fn collect_and_store(&self, summary: &mut CycleSummary) -> Result<()> {
        let orchestrator = self.orchestrator().await?;
        let outcome = orchestrator.collect().await;
        summary.collected = outcome.papers.len();
        summary.sources = outcome.sources;

        let inserted = self.db.insert_new_papers(&outcome.papers).await?;
        summary.new_papers = inserted.len();
        info!(target: TARGET_FLYWHEEL, "Stored {} new papers of {} collected", summary.new_papers, summary.collected);
        Ok(())
    }

    async fn analyze(&self, summary: &mut CycleSummary) -> Result<()> {
        let analysis = analyze_pending(
            &self.db,
            self.analyzer.as_ref(),
            &self.cache,
            self.options.batch_limit,
            &self.options.analysis,
        )
        .await?;
        summary.analyzed = analysis.analyzed;
        Ok(())
    }

    /// Embeds stored papers that have an abstract but no vector yet.
    pub async fn embed_pending(&self) -> Result<usize> {
        let papers = self.db.unembedded_papers(self.options.batch_limit).await?;
        if papers.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = papers
            .iter()
            .map(|paper| paper.abstract_text().unwrap_or(&paper.title).to_string())
            .collect();
        let vectors = generate_embeddings(
            self.embedder.as_ref(),
            &texts,
            self.options.embedding_concurrency,
            true,
        )
        .await?;
        for (paper, vector) in papers.iter().zip(&vectors) {
            if let (Some(id), None) = (paper.id, vector) {
                if let Err(e) = self.db.record_embedding_failure(id).await {
                    warn!(target: TARGET_FLYWHEEL, "Failed to record embedding failure for paper {}: {}", id, e);
                }
            }
        }
        save_embeddings(&self.db, self.vectors.as_ref(), &papers, &vectors).await
    }

    async fn report(&self, summary: &mut CycleSummary) -> Result<()> {
        match self.reports.synthesize_today().await {
            Ok(report) => {
                summary.report_id = Some(report.report_id);
                Ok(())
            }
            Err(FlywheelError::NoData(reason)) => {
                info!(target: TARGET_FLYWHEEL, "No report this cycle: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn record(summary: &mut CycleSummary, stage: &str, result: Result<()>) {
        if let Err(e) = result {
            error!(target: TARGET_FLYWHEEL, "Stage {} failed: {}", stage, e);
            summary.errors.push(format!("{}: {}", stage, e));
        }
    }

    pub async fn run(&self) -> CycleSummary {
        let mut summary = CycleSummary {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };
        info!(target: TARGET_FLYWHEEL, "Flywheel cycle starting");

        summary.log_id = match self.db.start_collection_log().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(target: TARGET_FLYWHEEL, "Could not open collection log: {}", e);
                None
            }
        };

        let result = self.collect_and_store(&mut summary).await;
        Self::record(&mut summary, "collect", result);

        let result = self.analyze(&mut summary).await;
        Self::record(&mut summary, "analyze", result);

        let result = self.embed_pending().await.map(|embedded| summary.embedded = embedded);
        Self::record(&mut summary, "embed", result);

        let result = self.report(&mut summary).await;
        Self::record(&mut summary, "report", result);

        summary.finished_at = Utc::now().to_rfc3339();
        if let Some(log_id) = summary.log_id {
            let counts = CollectionCounts {
                total_papers: summary.collected as i64,
                new_papers: summary.new_papers as i64,
                analyzed_papers: summary.analyzed as i64,
                embedded_papers: summary.embedded as i64,
                report_id: summary.report_id,
                sources: summary.sources.clone(),
            };
            let error = (!summary.errors.is_empty()).then(|| summary.errors.join("; "));
            if let Err(e) = self
                .db
                .finish_collection_log(log_id, &counts, error.as_deref())
                .await
            {
                warn!(target: TARGET_FLYWHEEL, "Could not close collection log {}: {}", log_id, e);
            }
        }

        info!(
            target: TARGET_FLYWHEEL,
            "Flywheel cycle finished: {} collected, {} new, {} analyzed, {} embedded, report {:?}, {} errors",
            summary.collected,
            summary.new_papers,
            summary.analyzed,
            summary.embedded,
            summary.report_id,
            summary.errors.len()
        );
        summary
    }
}

#[async_trait]
impl CycleRunner for Flywheel {
    async fn run_cycle(&self) -> Result<CycleSummary> {
        Ok(self.run().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::PaperCollector;
    use crate::db::collection_log::{STATUS_FAILED, STATUS_SUCCESS};
    use crate::llm::LlmClient;
    use crate::paper::Paper;
    use crate::test_support::{paper_with_doi, MockAnalyzer, MockEmbedder, ScriptedChat};
    use crate::vector::LocalVectorStore;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Fixed(Vec<Paper>);

    #[async_trait]
    impl PaperCollector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn collect(&self, _start: NaiveDate, _end: NaiveDate) -> Result<Vec<Paper>> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl PaperCollector for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn collect(&self, _start: NaiveDate, _end: NaiveDate) -> Result<Vec<Paper>> {
            Err(FlywheelError::Upstream("no route to host".into()))
        }
    }

    fn flywheel(db: &Database, orchestrator: Orchestrator) -> (Flywheel, Arc<LocalVectorStore>) {
        let vectors = Arc::new(LocalVectorStore::in_memory("test"));
        let llm = LlmClient::new(Arc::new(ScriptedChat::new(vec![])), 1, Duration::from_millis(1));
        let wheel = Flywheel {
            db: db.clone(),
            collectors: CollectorSet::Fixed(Arc::new(orchestrator)),
            analyzer: Arc::new(MockAnalyzer::new()),
            cache: Arc::new(AnalysisCache::new()),
            embedder: Arc::new(MockEmbedder::new(8)),
            vectors: vectors.clone(),
            reports: ReportSynthesizer::new(db.clone(), llm),
            options: FlywheelOptions::default(),
        };
        (wheel, vectors)
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let db = Database::in_memory().await.unwrap();
        db.insert_paper(&paper_with_doi("10.1/old", "Already stored")).await.unwrap();

        let orchestrator = Orchestrator::new(7).with_collector(
            "fixed",
            None,
            Arc::new(Fixed(vec![
                paper_with_doi("10.1/old", "Already stored"),
                paper_with_doi("10.1/a", "Finch beaks"),
                paper_with_doi("10.1/b", "Stickleback armour"),
            ])),
        );
        let (wheel, vectors) = flywheel(&db, orchestrator);
        let summary = wheel.run().await;

        assert!(summary.succeeded(), "errors: {:?}", summary.errors);
        assert_eq!(summary.collected, 3);
        assert_eq!(summary.new_papers, 2);
        assert_eq!(summary.analyzed, 3);
        assert_eq!(summary.embedded, 3);
        assert!(summary.report_id.is_some());
        assert_eq!(vectors.count().await.unwrap(), 3);

        let log = db.latest_collection_log().await.unwrap().unwrap();
        assert_eq!(log.status, STATUS_SUCCESS);
        assert_eq!(log.new_papers, 2);
        assert_eq!(log.report_id, summary.report_id);
        assert_eq!(log.sources, vec!["fixed"]);
    }

    #[tokio::test]
    async fn test_cycle_without_network_completes() {
        let db = Database::in_memory().await.unwrap();
        let orchestrator = Orchestrator::new(7).with_collector("down", None, Arc::new(Unreachable));
        let (wheel, _) = flywheel(&db, orchestrator);

        let summary = wheel.run().await;
        assert!(summary.succeeded());
        assert_eq!(summary.collected, 0);
        assert_eq!(summary.report_id, None);

        let log = db.latest_collection_log().await.unwrap().unwrap();
        assert_eq!(log.status, STATUS_SUCCESS);
        assert!(log.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failing_stage_marks_log_failed() {
        let db = Database::in_memory().await.unwrap();
        let orchestrator = Orchestrator::new(7)
            .with_collector("fixed", None, Arc::new(Fixed(vec![paper_with_doi("10.1/a", "A")])));
        let (mut wheel, _) = flywheel(&db, orchestrator);
        wheel.options.analysis.continue_on_error = false;
        wheel.analyzer = Arc::new(MockAnalyzer::new().failing_on("A"));

        let summary = wheel.run().await;
        assert_eq!(summary.new_papers, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("analyze"));
        // Later stages still ran.
        assert_eq!(summary.embedded, 1);

        let log = db.latest_collection_log().await.unwrap().unwrap();
        assert_eq!(log.status, STATUS_FAILED);
        assert!(log.error_message.unwrap().contains("analyze"));
    }
}
