use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors::VectorsOptions;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, GetPoints,
    PointId, PointStruct, PointsIdsList, SearchParams, SearchPoints, UpsertPoints,
    VectorParamsBuilder, WithPayloadSelector, WithVectorsSelector, WriteOrdering,
};
use qdrant_client::Qdrant;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use super::{GetResponse, Metadata, QueryResponse, VectorStore, Where};
use crate::error::{FlywheelError, Result};
use crate::TARGET_VECTOR;

/// Payload key holding the document text next to the metadata.
const DOCUMENT_KEY: &str = "document";

/// Qdrant-backed collection. Points are keyed by the numeric paper id and compared by
/// cosine similarity; distances handed back are `1 - score`.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantVectorStore {
    /// Connects and makes sure the collection exists with the expected dimension.
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .timeout(Duration::from_secs(60))
            .build()?;

        if client.collection_exists(collection).await? {
            let info = client.collection_info(collection).await?;
            let existing = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config)
                .and_then(|config| match config {
                    VectorsConfigKind::Params(params) => Some(params.size as usize),
                    _ => None,
                });
            if let Some(existing) = existing {
                if existing != dimension {
                    error!(target: TARGET_VECTOR, "Collection {} holds {}-dimensional vectors, configured {}", collection, existing, dimension);
                    return Err(FlywheelError::Validation(format!(
                        "collection {} holds {}-dimensional vectors, configured {}",
                        collection, existing, dimension
                    )));
                }
            }
        } else {
            info!(target: TARGET_VECTOR, "Creating Qdrant collection {} ({} dimensions)", collection, dimension);
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection)
                        .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
                )
                .await?;
        }

        Ok(QdrantVectorStore {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(FlywheelError::Validation(format!(
                "collection {} holds {}-dimensional vectors, got {}",
                self.collection,
                self.dimension,
                vector.len()
            )));
        }
        Ok(())
    }
}

fn point_id(id: &str) -> Result<PointId> {
    let num: u64 = id
        .trim()
        .parse()
        .map_err(|_| FlywheelError::Validation(format!("point id must be numeric: {}", id)))?;
    Ok(PointId::from(num))
}

fn point_id_to_string(id: Option<PointId>) -> Option<String> {
    match id?.point_id_options? {
        PointIdOptions::Num(num) => Some(num.to_string()),
        PointIdOptions::Uuid(uuid) => Some(uuid),
    }
}

fn qdrant_to_json(value: qdrant_client::qdrant::Value) -> Value {
    match value.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(st)) => Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_to_json(v)))
                .collect(),
        ),
    }
}

fn json_to_qdrant(value: Value) -> qdrant_client::qdrant::Value {
    use qdrant_client::qdrant::{ListValue, Struct};

    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(fields) => Kind::StructValue(Struct {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant(v)))
                .collect(),
        }),
    };
    qdrant_client::qdrant::Value { kind: Some(kind) }
}

/// Splits a point payload into metadata and the document text.
fn split_payload(payload: HashMap<String, qdrant_client::qdrant::Value>) -> (Metadata, Option<String>) {
    let mut metadata = Map::new();
    let mut document = None;
    for (key, value) in payload {
        match qdrant_to_json(value) {
            Value::String(text) if key == DOCUMENT_KEY => document = Some(text),
            json => {
                metadata.insert(key, json);
            }
        }
    }
    (metadata, document)
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Metadata,
        document: Option<String>,
    ) -> Result<()> {
        self.check_dimension(vector)?;

        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = metadata
            .into_iter()
            .map(|(k, v)| (k, json_to_qdrant(v)))
            .collect();
        if let Some(document) = document {
            payload.insert(DOCUMENT_KEY.to_string(), json_to_qdrant(Value::String(document)));
        }

        let point = PointStruct {
            id: Some(point_id(id)?),
            vectors: Some(qdrant_client::qdrant::Vectors {
                vectors_options: Some(VectorsOptions::Vector(qdrant_client::qdrant::Vector {
                    data: vector.to_vec(),
                    indices: None,
                    vector: None,
                    vectors_count: None,
                })),
            }),
            payload,
            ..Default::default()
        };

        let upsert_points = UpsertPoints {
            collection_name: self.collection.clone(),
            points: vec![point],
            wait: Some(true),
            ordering: Some(WriteOrdering::default()),
            shard_key_selector: None,
        };

        match self.client.upsert_points(upsert_points).await {
            Ok(_) => {
                info!(target: TARGET_VECTOR, "Stored embedding for paper {}", id);
                Ok(())
            }
            Err(e) => {
                error!(target: TARGET_VECTOR, "Failed to store embedding for paper {}: {:?}", id, e);
                Err(e.into())
            }
        }
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&Where>) -> Result<QueryResponse> {
        self.check_dimension(vector)?;

        let search_points = SearchPoints {
            collection_name: self.collection.clone(),
            vector: vector.to_vec(),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector::from(true)),
            with_vectors: Some(WithVectorsSelector::from(false)),
            filter: filter.map(Where::to_qdrant).transpose()?,
            params: Some(SearchParams {
                exact: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.client.search_points(search_points).await?;

        let mut ids = Vec::with_capacity(response.result.len());
        let mut distances = Vec::with_capacity(response.result.len());
        let mut metadatas = Vec::with_capacity(response.result.len());
        let mut documents = Vec::with_capacity(response.result.len());
        for scored_point in response.result {
            let Some(id) = point_id_to_string(scored_point.id) else {
                continue;
            };
            let (metadata, document) = split_payload(scored_point.payload);
            ids.push(id);
            distances.push((1.0 - scored_point.score).max(0.0));
            metadatas.push(metadata);
            documents.push(document);
        }

        Ok(QueryResponse::single(ids, distances, metadatas, documents))
    }

    async fn get(&self, ids: &[String]) -> Result<GetResponse> {
        let point_ids = ids.iter().map(|id| point_id(id)).collect::<Result<Vec<_>>>()?;
        let response = self
            .client
            .get_points(GetPoints {
                collection_name: self.collection.clone(),
                ids: point_ids,
                with_payload: Some(WithPayloadSelector::from(true)),
                with_vectors: Some(WithVectorsSelector::from(true)),
                ..Default::default()
            })
            .await?;

        let mut result = GetResponse::default();
        for point in response.result {
            let Some(id) = point_id_to_string(point.id) else {
                continue;
            };
            let embedding = match point.vectors.and_then(|v| v.vectors_options) {
                Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v)) => v.data,
                other => {
                    error!(target: TARGET_VECTOR, "Unexpected vector format for paper {}: {:?}", id, other);
                    continue;
                }
            };
            let (metadata, document) = split_payload(point.payload);
            result.ids.push(id);
            result.embeddings.push(embedding);
            result.metadatas.push(metadata);
            result.documents.push(document);
        }
        Ok(result)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let point_ids = ids.iter().map(|id| point_id(id)).collect::<Result<Vec<_>>>()?;
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ids_are_numeric() {
        assert!(point_id("42").is_ok());
        assert!(matches!(point_id("abc"), Err(FlywheelError::Validation(_))));
        assert_eq!(point_id_to_string(Some(PointId::from(42u64))), Some("42".to_string()));
    }

    #[test]
    fn test_split_payload() {
        let mut payload = HashMap::new();
        payload.insert(DOCUMENT_KEY.to_string(), json_to_qdrant(Value::from("abstract")));
        payload.insert("importance_score".to_string(), json_to_qdrant(Value::from(80)));
        payload.insert(
            "tags".to_string(),
            json_to_qdrant(serde_json::json!(["a", {"b": 1.5}])),
        );
        let (metadata, document) = split_payload(payload);
        assert_eq!(document.as_deref(), Some("abstract"));
        assert_eq!(metadata["importance_score"], 80);
        assert_eq!(metadata["tags"], serde_json::json!(["a", {"b": 1.5}]));
    }
}
