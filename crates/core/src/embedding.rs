use crate::error::IndexError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

/// Opaque embedding capability: text in, fixed-size vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

/// Embeds through an Ollama instance's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.to_string(),
            dimensions,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let url = self.endpoint.join("api/embed")?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "model": self.model, "input": [text] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: EmbedResponse = response.json().await?;
        let vector = payload.embeddings.into_iter().next().ok_or_else(|| {
            IndexError::BackendResponse {
                backend: "ollama".to_string(),
                details: "embed response contained no vectors".to_string(),
            }
        })?;

        if vector.len() != self.dimensions {
            return Err(IndexError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vector)
    }
}

/// Deterministic local embedder for tests and offline use: character
/// trigrams hashed into a fixed number of buckets, L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct HashedEmbedder {
    pub dimensions: usize,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

fn fnv1a(bytes: impl Iterator<Item = u8>) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for trigram in chars.windows(3) {
            let hash = fnv1a(trigram.iter().collect::<String>().bytes());
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}
