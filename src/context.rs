//! The application context: one instance of every process-wide service.

use std::sync::Arc;
use tracing::info;

use crate::analysis::AnalysisCache;
use crate::collector::{create_http_client, default_sources};
use crate::config::Settings;
use crate::db::Database;
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::error::Result;
use crate::flywheel::{CollectorSet, Flywheel, FlywheelOptions, Scheduler};
use crate::llm::{LlmClient, PaperAnalyzer};
use crate::report::ReportSynthesizer;
use crate::vector::{LocalVectorStore, QdrantVectorStore, SearchService, VectorStore, COLLECTION_NAME};
use crate::TARGET_FLYWHEEL;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub db: Database,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: LlmClient,
    pub search: SearchService,
    pub reports: ReportSynthesizer,
    pub flywheel: Arc<Flywheel>,
    pub scheduler: Scheduler,
}

/// Collaborators the context is assembled from.
pub struct Services {
    pub db: Database,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: LlmClient,
    pub analyzer: Arc<dyn PaperAnalyzer>,
    pub collectors: CollectorSet,
}

impl AppContext {
    /// Connects every backend named in `settings` and seeds the source registry.
    pub async fn build(settings: Settings, dry_run: bool) -> Result<Self> {
        let db = Database::new(&settings.database_url).await?;

        let seeded = db.seed_sources(&default_sources(&settings)).await?;
        info!(target: TARGET_FLYWHEEL, "Source registry seeded ({} new)", seeded);

        let vectors: Arc<dyn VectorStore> = match &settings.qdrant_url {
            Some(url) => Arc::new(
                QdrantVectorStore::connect(url, COLLECTION_NAME, settings.embedding_dimension).await?,
            ),
            None => Arc::new(LocalVectorStore::open(&settings.vector_persist_dir, COLLECTION_NAME).await?),
        };

        let llm = LlmClient::from_settings(&settings)?;
        let services = Services {
            db,
            vectors,
            embedder: Arc::new(OpenAiEmbedder::from_settings(&settings)?),
            analyzer: Arc::new(llm.clone()),
            llm,
            collectors: CollectorSet::Registry {
                settings: settings.clone(),
                client: create_http_client()?,
            },
        };
        Self::assemble(settings, services, dry_run)
    }

    pub fn assemble(settings: Settings, services: Services, dry_run: bool) -> Result<Self> {
        let Services {
            db,
            vectors,
            embedder,
            llm,
            analyzer,
            collectors,
        } = services;

        let search = SearchService::new(vectors.clone(), embedder.clone(), db.clone());
        let reports = ReportSynthesizer::new(db.clone(), llm.clone());
        let flywheel = Arc::new(Flywheel {
            db: db.clone(),
            collectors,
            analyzer,
            cache: Arc::new(AnalysisCache::new()),
            embedder: embedder.clone(),
            vectors: vectors.clone(),
            reports: reports.clone(),
            options: FlywheelOptions::from_settings(&settings, dry_run),
        });
        let scheduler = Scheduler::new(flywheel.clone(), &settings.schedule)?;

        Ok(AppContext {
            settings,
            db,
            vectors,
            embedder,
            llm,
            search,
            reports,
            flywheel,
            scheduler,
        })
    }
}
