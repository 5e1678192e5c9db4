//! Semantic, hybrid and find-similar search over the paper collection.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{distance_to_similarity, Metadata, QueryResponse, VectorStore, Where, PAPER_ID_KEY};
use crate::db::{Database, PaperFilter, MAX_PREFILTER_IDS};
use crate::embedding::Embedder;
use crate::error::{FlywheelError, Result};
use crate::TARGET_VECTOR;

/// Query vectors shorter than this are refused.
pub const MIN_QUERY_DIMENSION: usize = 384;

/// Results closer than this to the anchor are treated as the anchor itself.
const SELF_MATCH_DISTANCE: f32 = 0.001;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    pub paper_id: String,
    pub distance: f32,
    pub similarity: f32,
    pub metadata: Metadata,
    pub document: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<SearchResult>,
    pub query_metadata: Value,
}

impl SearchResponse {
    fn empty(query_metadata: Value) -> Self {
        SearchResponse {
            total: 0,
            results: Vec::new(),
            query_metadata,
        }
    }
}

/// Flattens the nested-list query shape into results sorted by ascending distance.
fn reformat(response: QueryResponse) -> Vec<SearchResult> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let distances = response.distances.into_iter().next().unwrap_or_default();
    let mut metadatas = response.metadatas.into_iter().next().unwrap_or_default().into_iter();
    let mut documents = response.documents.into_iter().next().unwrap_or_default().into_iter();

    let mut results: Vec<SearchResult> = ids
        .into_iter()
        .zip(distances)
        .map(|(paper_id, distance)| SearchResult {
            paper_id,
            distance,
            similarity: distance_to_similarity(distance),
            metadata: metadatas.next().unwrap_or_default(),
            document: documents.next().flatten(),
        })
        .collect();
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results
}

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    db: Database,
}

impl SearchService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, db: Database) -> Self {
        SearchService { store, embedder, db }
    }

    pub async fn semantic_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<Where>,
        min_score: Option<i64>,
    ) -> Result<SearchResponse> {
        if vector.len() < MIN_QUERY_DIMENSION {
            return Err(FlywheelError::Validation(format!(
                "query vector has {} dimensions, at least {} required",
                vector.len(),
                MIN_QUERY_DIMENSION
            )));
        }

        let filter = match min_score {
            Some(min_score) => Some(Where::merge(
                filter,
                Where::gte("importance_score", min_score as f64),
            )),
            None => filter,
        };

        let response = self.store.query(vector, k, filter.as_ref()).await?;
        let results = reformat(response);
        debug!(target: TARGET_VECTOR, "Semantic search returned {} results", results.len());

        Ok(SearchResponse {
            total: results.len(),
            results,
            query_metadata: json!({
                "search_type": "semantic",
                "n_results": k,
                "where": filter.as_ref().map(Where::to_json),
                "vector_dimension": vector.len(),
            }),
        })
    }

    pub async fn semantic_search_by_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<Where>,
        min_score: Option<i64>,
    ) -> Result<SearchResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FlywheelError::Validation("search text is empty".to_string()));
        }
        let vector = self.embedder.embed(text).await?;
        let mut response = self.semantic_search(&vector, k, filter, min_score).await?;
        response.query_metadata["query_text"] = json!(text);
        Ok(response)
    }

    /// Papers nearest to the stored vector of `paper_id`, never including the paper itself.
    pub async fn find_similar_by_paper_id(&self, paper_id: i64, k: usize) -> Result<SearchResponse> {
        let anchor_id = paper_id.to_string();
        let anchor = self.store.get(std::slice::from_ref(&anchor_id)).await?;
        let Some(vector) = anchor.embeddings.into_iter().next() else {
            return Err(FlywheelError::NotFound(format!(
                "no vector stored for paper {}",
                paper_id
            )));
        };

        let response = self.store.query(&vector, k + 1, None).await?;
        let mut results: Vec<SearchResult> = reformat(response)
            .into_iter()
            .filter(|r| r.paper_id != anchor_id && r.distance >= SELF_MATCH_DISTANCE)
            .collect();
        results.truncate(k);

        Ok(SearchResponse {
            total: results.len(),
            results,
            query_metadata: json!({
                "search_type": "similar",
                "paper_id": paper_id,
                "n_results": k,
            }),
        })
    }

    /// Metadata prefilter in the relational store, then vector rank over the survivors.
    pub async fn hybrid_search(
        &self,
        vector: &[f32],
        filter: &PaperFilter,
        k: usize,
    ) -> Result<SearchResponse> {
        let ids = self.db.filter_paper_ids(filter, MAX_PREFILTER_IDS).await?;
        let query_metadata = json!({
            "search_type": "hybrid",
            "n_results": k,
            "prefilter": filter,
            "prefilter_count": ids.len(),
        });

        if ids.is_empty() {
            info!(target: TARGET_VECTOR, "Hybrid search prefilter matched no papers");
            return Ok(SearchResponse::empty(query_metadata));
        }

        let id_filter = Where::is_in(PAPER_ID_KEY, ids.iter().map(|id| id.to_string()));
        let response = self.store.query(vector, k, Some(&id_filter)).await?;
        let results = reformat(response);

        Ok(SearchResponse {
            total: results.len(),
            results,
            query_metadata,
        })
    }

    pub async fn hybrid_search_by_text(
        &self,
        text: &str,
        filter: &PaperFilter,
        k: usize,
    ) -> Result<SearchResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FlywheelError::Validation("search text is empty".to_string()));
        }
        // Avoid the embedding call when nothing can match.
        if self.db.filter_paper_ids(filter, 1).await?.is_empty() {
            return self.hybrid_search(&[], filter, k).await;
        }
        let vector = self.embedder.embed(text).await?;
        self.hybrid_search(&vector, filter, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{analyzed, paper_with_doi, CountingVectorStore, MockEmbedder};
    use crate::vector::{paper_metadata, LocalVectorStore};

    const DIM: usize = MIN_QUERY_DIMENSION;

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        v
    }

    fn blend(a: usize, b: usize, wb: f32) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[a] = 1.0;
        v[b] = wb;
        v
    }

    async fn service() -> (SearchService, Arc<CountingVectorStore>, Database) {
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(CountingVectorStore::new(LocalVectorStore::in_memory("test")));
        let service = SearchService::new(store.clone(), Arc::new(MockEmbedder::new(DIM)), db.clone());
        (service, store, db)
    }

    #[tokio::test]
    async fn test_semantic_search_validates_dimension() {
        let (service, store, _) = service().await;
        let err = service.semantic_search(&[1.0; 10], 5, None, None).await.unwrap_err();
        assert!(matches!(err, FlywheelError::Validation(_)));
        assert_eq!(store.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_semantic_search_applies_min_score_and_sorts() {
        let (service, store, _) = service().await;
        let mut high = Metadata::new();
        high.insert("importance_score".into(), json!(90));
        let mut low = Metadata::new();
        low.insert("importance_score".into(), json!(30));
        store.upsert("1", &blend(0, 1, 0.5), high.clone(), None).await.unwrap();
        store.upsert("2", &unit(0), low, None).await.unwrap();
        store.upsert("3", &unit(0), high, None).await.unwrap();

        let response = service.semantic_search(&unit(0), 5, None, Some(80)).await.unwrap();
        assert_eq!(response.total, 2);
        let ids: Vec<&str> = response.results.iter().map(|r| r.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
        for r in &response.results {
            assert_eq!(r.similarity, (1.0 - r.distance).max(0.0));
        }
    }

    #[tokio::test]
    async fn test_semantic_search_by_text_rejects_blank() {
        let (service, _, _) = service().await;
        assert!(matches!(
            service.semantic_search_by_text("  ", 5, None, None).await,
            Err(FlywheelError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_find_similar_excludes_anchor() {
        let (service, store, _) = service().await;
        store.upsert("1", &unit(0), Metadata::new(), None).await.unwrap();
        store.upsert("3", &blend(0, 1, 0.3), Metadata::new(), None).await.unwrap();
        store.upsert("4", &blend(0, 1, 1.0), Metadata::new(), None).await.unwrap();
        store.upsert("5", &unit(1), Metadata::new(), None).await.unwrap();

        let response = service.find_similar_by_paper_id(1, 2).await.unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);

        // An identical vector under another id counts as a self match.
        store.upsert("2", &unit(0), Metadata::new(), None).await.unwrap();
        let response = service.find_similar_by_paper_id(1, 2).await.unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.paper_id.as_str()).collect();
        assert!(!ids.contains(&"1"));
        assert!(!ids.contains(&"2"));
        assert!(ids.len() <= 2);

        assert!(matches!(
            service.find_similar_by_paper_id(99, 2).await,
            Err(FlywheelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hybrid_search_with_empty_prefilter() {
        let (service, store, db) = service().await;
        db.insert_paper(&analyzed(paper_with_doi("10.1/a", "A"), "Anolis", 90))
            .await
            .unwrap();

        let filter = PaperFilter {
            taxa: Some("Nonexistent".to_string()),
            ..Default::default()
        };
        let response = service.hybrid_search(&unit(0), &filter, 5).await.unwrap();
        assert_eq!(response.total, 0);
        assert!(response.results.is_empty());
        assert_eq!(store.query_calls(), 0);

        let by_text = service.hybrid_search_by_text("lizards", &filter, 5).await.unwrap();
        assert_eq!(by_text.total, 0);
        assert_eq!(store.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_hybrid_search_ranks_prefiltered_papers() {
        let (service, store, db) = service().await;
        let mut ids = Vec::new();
        for (doi, taxa, score) in [("10.1/a", "Anolis", 90), ("10.1/b", "Mus", 90), ("10.1/c", "Anolis", 40)] {
            let mut paper = analyzed(paper_with_doi(doi, doi), taxa, score);
            let id = db.insert_paper(&paper).await.unwrap().unwrap();
            paper.id = Some(id);
            ids.push(id);
            store
                .upsert(&id.to_string(), &unit(0), paper_metadata(&paper), None)
                .await
                .unwrap();
        }

        let filter = PaperFilter {
            taxa: Some("Anolis".to_string()),
            min_score: Some(50),
            ..Default::default()
        };
        let response = service.hybrid_search(&unit(0), &filter, 5).await.unwrap();
        assert_eq!(store.query_calls(), 1);
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].paper_id, ids[0].to_string());
    }
}
