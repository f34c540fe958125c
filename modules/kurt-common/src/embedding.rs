use anyhow::Result;

/// Text embedding provider. Implemented by llm-client; the no-op variant keeps
/// pipelines runnable without an embedding API key.
#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Whether this embedder actually produces vectors. Pipelines use this to
    /// fall back to non-semantic strategies (e.g. prefix clustering).
    fn is_available(&self) -> bool {
        true
    }
}

/// No-op embedder for contexts without an embedding API key.
pub struct NoOpEmbedder;

#[async_trait::async_trait]
impl TextEmbedder for NoOpEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![])
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![]; texts.len()])
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Serialize an embedding as little-endian f32 bytes for BYTEA storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Inverse of [`embedding_to_bytes`]. Trailing partial floats are dropped.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Zero when either norm is zero or
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![0.1_f32, -2.5, 1024.0, 0.0];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![0.5, 0.2, -0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_norm_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn noop_embedder_reports_unavailable() {
        let embedder = NoOpEmbedder;
        assert!(!embedder.is_available());
        assert!(embedder.embed("anything").await.unwrap().is_empty());
        let batch = embedder.embed_batch(vec!["a".into(), "b".into()]).await.unwrap();
        assert_eq!(batch.len(), 2);
    }
}
