use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::index::ChunkIndex;
use crate::models::{Chunk, IndexSnapshot, ScoredChunk};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// Chunk store backed by a Chroma server's HTTP API.
///
/// Chunks are written with their deterministic id as primary key and
/// `{source, page, sequence_index, checksum}` as metadata, which is what the
/// snapshot-based skip checks read back. Writes go through `upsert`, so
/// re-writing an id never duplicates it.
pub struct ChromaStore {
    endpoint: Url,
    collection: String,
    collection_id: OnceCell<String>,
    client: Client,
    embedder: Arc<dyn Embedder>,
}

impl ChromaStore {
    pub fn new(
        endpoint: &str,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.to_string(),
            collection_id: OnceCell::new(),
            client: Client::new(),
            embedder,
        })
    }

    async fn collection_id(&self) -> Result<&str, IndexError> {
        self.collection_id
            .get_or_try_init(|| self.resolve_collection())
            .await
            .map(String::as_str)
    }

    async fn resolve_collection(&self) -> Result<String, IndexError> {
        let url = self.endpoint.join("api/v1/collections")?;
        let response = self
            .client
            .post(url)
            .json(&json!({
                "name": self.collection,
                "get_or_create": true,
                "metadata": { "hnsw:space": "cosine" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: "chroma".to_string(),
                details: "collection response missing id".to_string(),
            })
    }

    async fn collection_request(&self, action: &str, body: Value) -> Result<Value, IndexError> {
        let collection_id = self.collection_id().await?;
        let url = self
            .endpoint
            .join(&format!("api/v1/collections/{collection_id}/{action}"))?;
        let response = self.client.post(url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "chroma".to_string(),
                details: format!("{action} returned {}", response.status()),
            });
        }

        Ok(response.json().await?)
    }
}

fn chunk_metadata(chunk: &Chunk) -> Value {
    json!({
        "source": chunk.source,
        "page": chunk.page,
        "sequence_index": chunk.sequence_index,
        "checksum": chunk.checksum,
        "id": chunk.id,
    })
}

fn chunk_from_hit(id: &str, text: &str, metadata: &Value) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        source: metadata
            .pointer("/source")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        page: metadata
            .pointer("/page")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        sequence_index: metadata
            .pointer("/sequence_index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as u32,
        checksum: metadata
            .pointer("/checksum")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

#[async_trait]
impl ChunkIndex for ChromaStore {
    async fn persist(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            embeddings.push(self.embedder.embed(&chunk.text).await?);
        }

        let ids: Vec<&str> = chunks.iter().map(|chunk| chunk.id.as_str()).collect();
        let documents: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let metadatas: Vec<Value> = chunks.iter().map(chunk_metadata).collect();

        self.collection_request(
            "upsert",
            json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;

        Ok(())
    }

    async fn search(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let query_vector = self.embedder.embed(question).await?;

        let parsed = self
            .collection_request(
                "query",
                json!({
                    "query_embeddings": [query_vector],
                    "n_results": k,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        let empty = Vec::new();
        let ids = parsed.pointer("/ids/0").and_then(Value::as_array).unwrap_or(&empty);
        let documents = parsed
            .pointer("/documents/0")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let metadatas = parsed
            .pointer("/metadatas/0")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let distances = parsed
            .pointer("/distances/0")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        let mut hits = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            let id = id.as_str().unwrap_or_default();
            let text = documents
                .get(position)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let metadata = metadatas.get(position).cloned().unwrap_or(Value::Null);
            let distance = distances
                .get(position)
                .and_then(Value::as_f64)
                .unwrap_or(f64::MAX);

            hits.push(ScoredChunk {
                chunk: chunk_from_hit(id, text, &metadata),
                distance,
            });
        }

        Ok(hits)
    }

    async fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let parsed = self
            .collection_request("get", json!({ "include": ["metadatas"] }))
            .await?;

        let mut snapshot = IndexSnapshot::default();

        if let Some(ids) = parsed.pointer("/ids").and_then(Value::as_array) {
            for id in ids {
                if let Some(id) = id.as_str() {
                    snapshot.ids.insert(id.to_string());
                }
            }
        }

        if let Some(metadatas) = parsed.pointer("/metadatas").and_then(Value::as_array) {
            for metadata in metadatas {
                if let Some(source) = metadata.pointer("/source").and_then(Value::as_str) {
                    snapshot.sources.insert(source.to_string());
                }
            }
        }

        Ok(snapshot)
    }

    async fn reopen(&self) -> Result<Box<dyn ChunkIndex>, IndexError> {
        // A fresh handle re-resolves the collection on first use.
        Ok(Box::new(Self::new(
            self.endpoint.as_str(),
            &self.collection,
            self.embedder.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk {
            id: "data/doc.pdf:2:1".to_string(),
            text: "chunk text".to_string(),
            source: "data/doc.pdf".to_string(),
            page: 2,
            sequence_index: 1,
            checksum: "deadbeef".to_string(),
        }
    }

    #[test]
    fn metadata_round_trips_through_a_query_hit() {
        let original = chunk();
        let metadata = chunk_metadata(&original);

        let rebuilt = chunk_from_hit(&original.id, &original.text, &metadata);

        assert_eq!(rebuilt, original);
    }

    #[test]
    fn missing_metadata_degrades_to_defaults() {
        let rebuilt = chunk_from_hit("x:0:0", "text", &Value::Null);
        assert_eq!(rebuilt.source, "");
        assert_eq!(rebuilt.page, 0);
    }
}
