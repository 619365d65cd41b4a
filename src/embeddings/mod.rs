// Embeddings module
// Turns document text into vectors for the vector backend

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaClient;

/// Computes one embedding per input text, in input order
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;
}
