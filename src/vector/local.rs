//! File-backed vector collection used when no Qdrant server is configured.
//!
//! The whole collection lives in memory and is rewritten to `<dir>/<collection>.json`
//! after every mutation. Queries are exact (brute-force cosine distance).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{cosine_distance, GetResponse, Metadata, QueryResponse, VectorStore, Where};
use crate::error::{FlywheelError, Result};
use crate::TARGET_VECTOR;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    embedding: Vec<f32>,
    metadata: Metadata,
    document: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    name: String,
    /// Fixed by the first insert; later vectors must match.
    dimension: Option<usize>,
    entries: BTreeMap<String, Entry>,
}

impl Collection {
    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        match self.dimension {
            Some(dimension) if dimension != vector.len() => Err(FlywheelError::Validation(format!(
                "collection {} holds {}-dimensional vectors, got {}",
                self.name,
                dimension,
                vector.len()
            ))),
            _ => Ok(()),
        }
    }
}

pub struct LocalVectorStore {
    path: Option<PathBuf>,
    collection: RwLock<Collection>,
}

impl LocalVectorStore {
    /// Opens (or creates) the collection persisted under `dir`.
    pub async fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", name));

        let collection = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<Collection>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collection {
                name: name.to_string(),
                ..Default::default()
            },
            Err(e) => return Err(e.into()),
        };

        info!(target: TARGET_VECTOR, "Opened local vector collection {} ({} entries) at {}",
              name, collection.entries.len(), path.display());

        Ok(LocalVectorStore {
            path: Some(path),
            collection: RwLock::new(collection),
        })
    }

    /// A collection that is never written to disk.
    pub fn in_memory(name: &str) -> Self {
        LocalVectorStore {
            path: None,
            collection: RwLock::new(Collection {
                name: name.to_string(),
                ..Default::default()
            }),
        }
    }

    pub async fn dimension(&self) -> Option<usize> {
        self.collection.read().await.dimension
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(collection)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Metadata,
        document: Option<String>,
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(FlywheelError::Validation("empty vector".to_string()));
        }

        let mut collection = self.collection.write().await;
        collection.check_dimension(vector)?;
        collection.dimension = Some(vector.len());
        collection.entries.insert(
            id.to_string(),
            Entry {
                embedding: vector.to_vec(),
                metadata,
                document,
            },
        );
        self.persist(&collection).await?;
        debug!(target: TARGET_VECTOR, "Upserted vector {} into {}", id, collection.name);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&Where>) -> Result<QueryResponse> {
        let collection = self.collection.read().await;
        collection.check_dimension(vector)?;

        let mut scored = Vec::new();
        for (id, entry) in &collection.entries {
            if filter.is_some_and(|f| !f.matches(&entry.metadata)) {
                continue;
            }
            scored.push((cosine_distance(vector, &entry.embedding)?, id, entry));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(k);

        let mut ids = Vec::with_capacity(scored.len());
        let mut distances = Vec::with_capacity(scored.len());
        let mut metadatas = Vec::with_capacity(scored.len());
        let mut documents = Vec::with_capacity(scored.len());
        for (distance, id, entry) in scored {
            ids.push(id.clone());
            distances.push(distance);
            metadatas.push(entry.metadata.clone());
            documents.push(entry.document.clone());
        }

        Ok(QueryResponse::single(ids, distances, metadatas, documents))
    }

    async fn get(&self, ids: &[String]) -> Result<GetResponse> {
        let collection = self.collection.read().await;
        let mut response = GetResponse::default();
        for id in ids {
            if let Some(entry) = collection.entries.get(id) {
                response.ids.push(id.clone());
                response.embeddings.push(entry.embedding.clone());
                response.metadatas.push(entry.metadata.clone());
                response.documents.push(entry.document.clone());
            }
        }
        Ok(response)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut collection = self.collection.write().await;
        for id in ids {
            collection.entries.remove(id);
        }
        self.persist(&collection).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.collection.read().await.entries.len())
    }
}
