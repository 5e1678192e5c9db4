//! Embedding collection keyed by paper id, plus the search services built on it.

pub mod filter;
pub mod local;
pub mod search;
pub mod similarity;
pub mod storage;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

pub use filter::{Where, PAPER_ID_KEY};
pub use local::LocalVectorStore;
pub use search::{SearchResponse, SearchResult, SearchService};
pub use similarity::{cosine_distance, cosine_similarity, distance_to_similarity};
pub use storage::QdrantVectorStore;

use crate::error::Result;
use crate::paper::Paper;

pub const COLLECTION_NAME: &str = "evolutionary_papers";

pub type Metadata = Map<String, Value>;

/// Nearest-neighbour results for one query vector, in the nested-list shape
/// (`ids[0]`, `distances[0]`, ...) common to document stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    pub distances: Vec<Vec<f32>>,
    pub metadatas: Vec<Vec<Metadata>>,
    pub documents: Vec<Vec<Option<String>>>,
}

impl QueryResponse {
    pub fn single(
        ids: Vec<String>,
        distances: Vec<f32>,
        metadatas: Vec<Metadata>,
        documents: Vec<Option<String>>,
    ) -> Self {
        QueryResponse {
            ids: vec![ids],
            distances: vec![distances],
            metadatas: vec![metadatas],
            documents: vec![documents],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GetResponse {
    pub ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub metadatas: Vec<Metadata>,
    pub documents: Vec<Option<String>>,
}

/// A persistent embedding collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the entry stored under `id`.
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Metadata,
        document: Option<String>,
    ) -> Result<()>;

    /// The `k` nearest entries to `vector` that satisfy `filter`, nearest first.
    async fn query(&self, vector: &[f32], k: usize, filter: Option<&Where>) -> Result<QueryResponse>;

    /// Entries stored under `ids`; unknown ids are omitted.
    async fn get(&self, ids: &[String]) -> Result<GetResponse>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// Metadata stored beside a paper's vector.
pub fn paper_metadata(paper: &Paper) -> Metadata {
    let mut metadata = Map::new();
    if let Some(id) = paper.id {
        metadata.insert(PAPER_ID_KEY.to_string(), json!(id.to_string()));
    }
    metadata.insert("title".to_string(), json!(paper.title));
    let optional = [
        ("doi", paper.doi().map(str::to_string)),
        ("taxa", paper.taxa.clone()),
        ("journal", paper.journal.clone()),
        ("publication_date", paper.publication_date.clone()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            metadata.insert(key.to_string(), json!(value));
        }
    }
    if let Some(score) = paper.importance_score {
        metadata.insert("importance_score".to_string(), json!(score));
    }
    metadata
}
