use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::Embedder;
use crate::db::Database;
use crate::error::{FlywheelError, Result};
use crate::paper::Paper;
use crate::vector::{paper_metadata, VectorStore};
use crate::TARGET_VECTOR;

pub const DEFAULT_EMBEDDING_CONCURRENCY: usize = 5;

/// Embeds every text with at most `max_concurrent` requests in flight.
///
/// The output has one slot per input, in input order. With `continue_on_error` a failed
/// item leaves `None` in its slot; otherwise the first failure aborts the batch and
/// in-flight requests are dropped.
pub async fn generate_embeddings(
    embedder: &dyn Embedder,
    texts: &[String],
    max_concurrent: usize,
    continue_on_error: bool,
) -> Result<Vec<Option<Vec<f32>>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

    let mut results = stream::iter(0..texts.len())
        .map(|index| {
            let text: &String = &texts[index];
            async move {
            let result = if text.trim().is_empty() {
                Err(FlywheelError::Validation(format!(
                    "text at index {} is empty",
                    index
                )))
            } else {
                embedder.embed(text).await
            };
            (index, result)
            }
        })
        .buffer_unordered(max_concurrent.max(1));

    while let Some((index, result)) = results.next().await {
        match result {
            Ok(vector) => slots[index] = Some(vector),
            Err(e) if continue_on_error => {
                warn!(target: TARGET_VECTOR, "Embedding {} failed: {}", index, e);
            }
            Err(e) => {
                error!(target: TARGET_VECTOR, "Embedding {} failed, aborting batch: {}", index, e);
                return Err(e);
            }
        }
    }

    Ok(slots)
}

/// Writes each non-empty vector to the vector store under the persisted paper's id and
/// flags the paper as embedded. Papers not found in the store (by id, then DOI) are
/// skipped. A failed write is counted against the paper and the rest of the batch goes on.
/// Returns the number of papers embedded.
pub async fn save_embeddings(
    db: &Database,
    store: &dyn VectorStore,
    papers: &[Paper],
    vectors: &[Option<Vec<f32>>],
) -> Result<usize> {
    let mut saved = 0;

    for (paper, vector) in papers.iter().zip(vectors) {
        let Some(vector) = vector else {
            continue;
        };

        let stored = match (paper.id, paper.doi()) {
            (Some(id), _) => db.get_paper(id).await?,
            (None, Some(doi)) => db.get_paper_by_doi(doi).await?,
            (None, None) => None,
        };
        let Some(stored) = stored else {
            debug!(target: TARGET_VECTOR, "Skipping embedding for unsaved paper: {}", paper.title);
            continue;
        };
        let Some(id) = stored.id else {
            continue;
        };

        let vector_id = id.to_string();
        if let Err(e) = store
            .upsert(
                &vector_id,
                vector,
                paper_metadata(&stored),
                stored.abstract_text.clone(),
            )
            .await
        {
            error!(target: TARGET_VECTOR, "Failed to store vector for paper {}: {}", id, e);
            if let Err(e) = db.record_embedding_failure(id).await {
                warn!(target: TARGET_VECTOR, "Failed to record embedding failure for paper {}: {}", id, e);
            }
            continue;
        }
        if let Err(e) = db.mark_embedded(id, &vector_id).await {
            warn!(target: TARGET_VECTOR, "Stored vector for paper {} but could not flag it: {}", id, e);
            continue;
        }
        saved += 1;
    }

    info!(target: TARGET_VECTOR, "Saved {} embeddings out of {} papers", saved, papers.len());
    Ok(saved)
}
