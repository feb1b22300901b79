use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identity of one source document, captured when its file is first read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub source: String,
    pub title: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

/// One extracted page of a document. Page numbers are zero-based.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// A chunk produced by the splitter, before identity assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftChunk {
    pub text: String,
    pub source: String,
    pub page: u32,
    pub checksum: String,
}

/// The unit of retrieval and storage.
///
/// `id` is `"{source}:{page}:{sequence_index}"` and doubles as the primary
/// key when the chunk is persisted. `checksum` is the sha256 digest of the
/// whole source document at the time it was read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: u32,
    pub sequence_index: u32,
    pub checksum: String,
}

/// Point-in-time view of which chunk ids and document sources the index
/// already holds. Captured once at the start of an ingestion run and never
/// refreshed mid-run.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub ids: HashSet<String>,
    pub sources: HashSet<String>,
}

impl IndexSnapshot {
    pub fn contains_source(&self, source: &str) -> bool {
        self.sources.contains(source)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// A retrieval hit. Lower `distance` means more relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f64,
}
