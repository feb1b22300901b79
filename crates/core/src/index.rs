use crate::error::IndexError;
use crate::models::{Chunk, IndexSnapshot, ScoredChunk};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Opaque retrieval index.
///
/// `persist` has upsert semantics: writing a chunk whose id is already
/// present replaces it and never duplicates. `reopen` hands back a fresh
/// handle over the same underlying storage, used for the post-ingestion
/// handle swap.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    async fn persist(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    /// Ranked by ascending distance; lower is more relevant.
    async fn search(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn snapshot(&self) -> Result<IndexSnapshot, IndexError>;

    async fn reopen(&self) -> Result<Box<dyn ChunkIndex>, IndexError>;
}

/// Owns the single shared index handle.
///
/// Every operation runs inside the same mutex: reads and writes mutually
/// exclude each other because the underlying index is not proven safe for
/// concurrent read+write. `swap` and `reload` replace the handle under that
/// lock, so an in-flight `query` observes either the old or the new handle
/// entirely, never a mix.
pub struct IndexGuard {
    handle: Mutex<Option<Box<dyn ChunkIndex>>>,
}

impl IndexGuard {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    pub fn with_handle(handle: Box<dyn ChunkIndex>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let locked = self.handle.lock().await;
        let index = locked.as_deref().ok_or_else(Self::uninitialized)?;
        index.search(question, k).await
    }

    pub async fn persist(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        let locked = self.handle.lock().await;
        let index = locked.as_deref().ok_or_else(Self::uninitialized)?;
        index.persist(chunks).await
    }

    pub async fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let locked = self.handle.lock().await;
        let index = locked.as_deref().ok_or_else(Self::uninitialized)?;
        index.snapshot().await
    }

    /// Installs a new handle, dropping the previous one.
    pub async fn swap(&self, new_handle: Box<dyn ChunkIndex>) {
        let mut locked = self.handle.lock().await;
        *locked = Some(new_handle);
    }

    /// Replaces the handle with a freshly reopened one. On failure the
    /// current handle stays installed.
    pub async fn reload(&self) -> Result<(), IndexError> {
        let mut locked = self.handle.lock().await;
        let index = locked.as_deref().ok_or_else(Self::uninitialized)?;
        let fresh = index.reopen().await?;
        *locked = Some(fresh);
        Ok(())
    }

    fn uninitialized() -> IndexError {
        IndexError::NotReady("no index handle installed".to_string())
    }
}

impl Default for IndexGuard {
    fn default() -> Self {
        Self::new()
    }
}
