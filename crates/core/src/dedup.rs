use crate::models::{Chunk, IndexSnapshot};

/// Drops chunks whose ids the snapshot already holds.
///
/// The document-level short-circuit (a source path already in
/// `snapshot.sources`) happens in the coordinator before extraction, so a
/// previously seen document never pays the chunking cost. This filter is the
/// second, per-chunk level.
pub fn filter_new_chunks(chunks: Vec<Chunk>, snapshot: &IndexSnapshot) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| !snapshot.contains_id(&chunk.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: "text".to_string(),
            source: "doc.pdf".to_string(),
            page: 0,
            sequence_index: 0,
            checksum: String::new(),
        }
    }

    #[test]
    fn known_ids_are_dropped() {
        let mut snapshot = IndexSnapshot::default();
        snapshot.ids.insert("doc.pdf:0:0".to_string());

        let kept = filter_new_chunks(vec![chunk("doc.pdf:0:0"), chunk("doc.pdf:0:1")], &snapshot);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "doc.pdf:0:1");
    }

    #[test]
    fn empty_snapshot_keeps_everything() {
        let snapshot = IndexSnapshot::default();
        let kept = filter_new_chunks(vec![chunk("a:0:0"), chunk("a:0:1")], &snapshot);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn source_membership_is_exposed_for_the_short_circuit() {
        let mut snapshot = IndexSnapshot::default();
        snapshot.sources.insert("data/a.pdf".to_string());

        assert!(snapshot.contains_source("data/a.pdf"));
        assert!(!snapshot.contains_source("data/b.pdf"));
    }
}
