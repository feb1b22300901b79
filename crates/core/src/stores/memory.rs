use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::index::ChunkIndex;
use crate::models::{Chunk, IndexSnapshot, ScoredChunk};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Brute-force cosine index over in-process storage, for tests and offline
/// use. Rows are keyed by chunk id, which gives `persist` its upsert
/// semantics for free. Cloning yields a new handle over the same storage, so
/// `reopen` survives handle swaps without losing data.
#[derive(Clone)]
pub struct MemoryIndex {
    rows: Arc<RwLock<HashMap<String, StoredChunk>>>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            embedder,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl ChunkIndex for MemoryIndex {
    async fn persist(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        // Embed before taking the write lock.
        let mut embedded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk.text).await?;
            embedded.push((chunk.clone(), vector));
        }

        let mut rows = self.rows.write().unwrap();
        for (chunk, vector) in embedded {
            rows.insert(chunk.id.clone(), StoredChunk { chunk, vector });
        }
        Ok(())
    }

    async fn search(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let query_vector = self.embedder.embed(question).await?;

        let rows = self.rows.read().unwrap();
        let mut hits: Vec<ScoredChunk> = rows
            .values()
            .map(|row| ScoredChunk {
                chunk: row.chunk.clone(),
                distance: 1.0 - f64::from(cosine_similarity(&query_vector, &row.vector)),
            })
            .collect();

        hits.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk.id.cmp(&right.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let rows = self.rows.read().unwrap();
        let mut snapshot = IndexSnapshot::default();
        for row in rows.values() {
            snapshot.ids.insert(row.chunk.id.clone());
            snapshot.sources.insert(row.chunk.source.clone());
        }
        Ok(snapshot)
    }

    async fn reopen(&self) -> Result<Box<dyn ChunkIndex>, IndexError> {
        Ok(Box::new(self.clone()))
    }
}
