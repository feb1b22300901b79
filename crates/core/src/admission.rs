use crate::models::Chunk;
use std::collections::BTreeMap;
use tracing::warn;

/// Hard ceiling on chunks persisted in one ingestion run.
pub const MAX_BATCH_SIZE: usize = 5461;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedDocument {
    pub source: String,
    pub chunk_count: usize,
}

#[derive(Debug)]
pub struct AdmissionOutcome {
    pub admitted: BTreeMap<String, Vec<Chunk>>,
    pub evicted: Vec<EvictedDocument>,
}

impl AdmissionOutcome {
    pub fn admitted_chunk_count(&self) -> usize {
        self.admitted.values().map(Vec::len).sum()
    }
}

/// Caps the run's total chunk count at `cap` by evicting whole documents,
/// largest chunk count first. Ties break lexicographically by source path so
/// eviction is deterministic. Evicted documents are not marked as ingested
/// and stay eligible for a future run.
pub fn admit(per_document: BTreeMap<String, Vec<Chunk>>, cap: usize) -> AdmissionOutcome {
    let mut total: usize = per_document.values().map(Vec::len).sum();
    if total <= cap {
        return AdmissionOutcome {
            admitted: per_document,
            evicted: Vec::new(),
        };
    }

    let mut by_size: Vec<(String, usize)> = per_document
        .iter()
        .map(|(source, chunks)| (source.clone(), chunks.len()))
        .collect();
    by_size.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    let mut admitted = per_document;
    let mut evicted = Vec::new();
    let mut queue = by_size.into_iter();

    while total > cap {
        let Some((source, chunk_count)) = queue.next() else {
            break;
        };
        admitted.remove(&source);
        total -= chunk_count;
        warn!(
            source = %source,
            chunk_count,
            "evicting document from this run to stay under the batch ceiling"
        );
        evicted.push(EvictedDocument {
            source,
            chunk_count,
        });
    }

    AdmissionOutcome { admitted, evicted }
}
