use crate::models::{Chunk, DraftChunk};

/// Assigns deterministic ids of the form `"{source}:{page}:{sequence_index}"`.
///
/// The sequence index resets to 0 whenever `(source, page)` changes from the
/// previous chunk and increments by 1 otherwise, so chunks MUST arrive in the
/// exact order the splitter produced them. Re-running over unchanged input
/// yields identical ids.
pub fn assign_ids(drafts: impl IntoIterator<Item = DraftChunk>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut last_key: Option<(String, u32)> = None;
    let mut sequence = 0u32;

    for draft in drafts {
        let key = (draft.source.clone(), draft.page);
        if last_key.as_ref() == Some(&key) {
            sequence += 1;
        } else {
            sequence = 0;
        }
        last_key = Some(key);

        chunks.push(Chunk {
            id: format!("{}:{}:{}", draft.source, draft.page, sequence),
            text: draft.text,
            source: draft.source,
            page: draft.page,
            sequence_index: sequence,
            checksum: draft.checksum,
        });
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(source: &str, page: u32, text: &str) -> DraftChunk {
        DraftChunk {
            text: text.to_string(),
            source: source.to_string(),
            page,
            checksum: String::new(),
        }
    }

    #[test]
    fn two_pages_with_three_chunks_each() {
        let drafts = vec![
            draft("doc", 0, "a"),
            draft("doc", 0, "b"),
            draft("doc", 0, "c"),
            draft("doc", 1, "d"),
            draft("doc", 1, "e"),
            draft("doc", 1, "f"),
        ];

        let ids: Vec<_> = assign_ids(drafts).into_iter().map(|c| c.id).collect();

        assert_eq!(
            ids,
            vec!["doc:0:0", "doc:0:1", "doc:0:2", "doc:1:0", "doc:1:1", "doc:1:2"]
        );
    }

    #[test]
    fn sequence_is_contiguous_from_zero_per_page() {
        let drafts = vec![
            draft("a.pdf", 0, "x"),
            draft("a.pdf", 0, "y"),
            draft("a.pdf", 2, "z"),
            draft("b.pdf", 0, "w"),
        ];

        let chunks = assign_ids(drafts);

        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[1].sequence_index, 1);
        assert_eq!(chunks[2].sequence_index, 0);
        assert_eq!(chunks[3].sequence_index, 0);
        assert_eq!(chunks[2].id, "a.pdf:2:0");
        assert_eq!(chunks[3].id, "b.pdf:0:0");
    }

    #[test]
    fn reassignment_is_idempotent() {
        let drafts = vec![draft("doc", 0, "a"), draft("doc", 0, "b")];
        let first: Vec<_> = assign_ids(drafts.clone()).into_iter().map(|c| c.id).collect();
        let second: Vec<_> = assign_ids(drafts).into_iter().map(|c| c.id).collect();
        assert_eq!(first, second);
    }
}
