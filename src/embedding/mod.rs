//! Text embeddings: the client seam and the order-preserving batch built on it.

pub mod batch;
pub mod openai;

use async_trait::async_trait;

pub use batch::{generate_embeddings, save_embeddings, DEFAULT_EMBEDDING_CONCURRENCY};
pub use openai::OpenAiEmbedder;

use crate::error::Result;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of the vectors this embedder is configured to produce.
    fn dimension(&self) -> usize;
}
