use crate::error::{IndexError, QueryError};
use crate::generation::{FragmentStream, TextGenerator};
use crate::index::IndexGuard;
use crate::models::ScoredChunk;
use crate::session::QueryGate;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TOP_K: usize = 3;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub fn build_prompt(hits: &[ScoredChunk], question: &str) -> String {
    let context = hits
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    format!(
        "Here is some context that can help you provide information to the question\n\n\
         {context}\n\n\
         ---\n\n\
         Knowing that only the context is true, lead the human to the legitimate \
         information about his question considering the above context: {question}\n"
    )
}

/// Answers questions: per-client admission, guarded retrieval, prompt
/// assembly, streamed generation.
pub struct QueryService {
    gate: QueryGate,
    index: Arc<IndexGuard>,
    generator: Arc<dyn TextGenerator>,
    top_k: usize,
}

impl QueryService {
    pub fn new(index: Arc<IndexGuard>, generator: Arc<dyn TextGenerator>, top_k: usize) -> Self {
        Self {
            gate: QueryGate::new(),
            index,
            generator,
            top_k,
        }
    }

    /// Streams the answer to `question` for `client_id`.
    ///
    /// Fails fast with `AlreadyActive` / `IndexUninitialized` /
    /// `EmptyQuestion` before any fragment is produced. Once streaming has
    /// begun, a generation failure is surfaced as one inline error fragment
    /// appended to the partial output. The admission permit lives inside the
    /// returned stream, so it releases when the stream is dropped, whether
    /// it ran to completion or the client disconnected mid-answer.
    pub async fn stream_answer(
        &self,
        client_id: &str,
        question: &str,
    ) -> Result<FragmentStream, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let permit = self.gate.try_enter(client_id)?;

        let hits = match self.index.query(question, self.top_k).await {
            Ok(hits) => hits,
            Err(IndexError::NotReady(_)) => return Err(QueryError::IndexUninitialized),
            Err(error) => return Err(QueryError::Index(error)),
        };

        let prompt = build_prompt(&hits, question);
        let mut fragments = self.generator.generate(&prompt).await?;

        let sources: Vec<String> = hits.iter().map(|hit| hit.chunk.id.clone()).collect();
        let client = client_id.to_string();

        let stream = async_stream::stream! {
            let _permit = permit;

            while let Some(next) = fragments.next().await {
                match next {
                    Ok(fragment) => yield Ok::<String, QueryError>(fragment),
                    Err(error) => {
                        warn!(client = %client, error = %error, "generation failed mid-stream");
                        yield Ok(format!("\n[generation error: {error}]"));
                        return;
                    }
                }
            }

            info!(client = %client, sources = ?sources, "query complete");
        };

        Ok(Box::pin(stream))
    }

    pub fn gate(&self) -> &QueryGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use crate::index::ChunkIndex;
    use crate::models::Chunk;
    use crate::stores::MemoryIndex;
    use async_trait::async_trait;
    use futures::stream;

    struct FakeGenerator {
        fragments: Vec<Result<String, QueryError>>,
    }

    impl FakeGenerator {
        fn speaking(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|f| Ok((*f).to_string())).collect(),
            }
        }

        fn failing_after(fragments: &[&str]) -> Self {
            let mut fragments: Vec<_> =
                fragments.iter().map(|f| Ok((*f).to_string())).collect();
            fragments.push(Err(QueryError::Streaming("connection reset".to_string())));
            Self { fragments }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, _prompt: &str) -> Result<FragmentStream, QueryError> {
            let fragments: Vec<_> = self
                .fragments
                .iter()
                .map(|f| match f {
                    Ok(text) => Ok(text.clone()),
                    Err(error) => Err(QueryError::Streaming(error.to_string())),
                })
                .collect();
            Ok(Box::pin(stream::iter(fragments)))
        }

        async fn probe(&self) -> Result<(), QueryError> {
            Ok(())
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: "doc.pdf".to_string(),
            page: 0,
            sequence_index: 0,
            checksum: String::new(),
        }
    }

    async fn service_with_chunks(
        generator: FakeGenerator,
        chunks: &[Chunk],
    ) -> QueryService {
        let index = MemoryIndex::new(Arc::new(HashedEmbedder::default()));
        index.persist(chunks).await.expect("persist fixture chunks");
        QueryService::new(
            Arc::new(IndexGuard::with_handle(Box::new(index))),
            Arc::new(generator),
            DEFAULT_TOP_K,
        )
    }

    #[tokio::test]
    async fn answer_concatenates_generated_fragments() {
        let service = service_with_chunks(
            FakeGenerator::speaking(&["Hello", " ", "world"]),
            &[chunk("doc.pdf:0:0", "pump pressure reference table")],
        )
        .await;

        let stream = service
            .stream_answer("client-a", "what is the pump pressure?")
            .await
            .expect("query admitted");
        let fragments: Vec<_> = stream.collect::<Vec<_>>().await;
        let answer: String = fragments.into_iter().map(Result::unwrap).collect();

        assert_eq!(answer, "Hello world");
        assert!(!service.gate().is_active("client-a"));
    }

    #[tokio::test]
    async fn second_concurrent_query_is_rejected_then_allowed() {
        let service = service_with_chunks(
            FakeGenerator::speaking(&["answer"]),
            &[chunk("doc.pdf:0:0", "context")],
        )
        .await;

        let first = service
            .stream_answer("client-a", "first question")
            .await
            .expect("first query admitted");

        let second = service.stream_answer("client-a", "second question").await;
        assert!(matches!(second, Err(QueryError::AlreadyActive(_))));

        // Dropping the stream mid-flight releases the slot (disconnect path).
        drop(first);

        let third = service.stream_answer("client-a", "third question").await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn mid_stream_failure_appends_inline_error_and_releases_flag() {
        let service = service_with_chunks(
            FakeGenerator::failing_after(&["partial "]),
            &[chunk("doc.pdf:0:0", "context")],
        )
        .await;

        let stream = service
            .stream_answer("client-a", "question")
            .await
            .expect("query admitted");
        let fragments: Vec<_> = stream.collect::<Vec<_>>().await;
        let answer: String = fragments.into_iter().map(Result::unwrap).collect();

        assert!(answer.starts_with("partial "));
        assert!(answer.contains("generation error"));
        assert!(!service.gate().is_active("client-a"));
    }

    #[tokio::test]
    async fn uninitialized_index_is_a_distinct_rejection() {
        let service = QueryService::new(
            Arc::new(IndexGuard::new()),
            Arc::new(FakeGenerator::speaking(&["unused"])),
            DEFAULT_TOP_K,
        );

        let result = service.stream_answer("client-a", "question").await;
        assert!(matches!(result, Err(QueryError::IndexUninitialized)));
        assert!(!service.gate().is_active("client-a"));
    }

    #[tokio::test]
    async fn blank_question_is_rejected_before_admission() {
        let service = service_with_chunks(
            FakeGenerator::speaking(&["unused"]),
            &[chunk("doc.pdf:0:0", "context")],
        )
        .await;

        let result = service.stream_answer("client-a", "   ").await;
        assert!(matches!(result, Err(QueryError::EmptyQuestion)));
        assert!(!service.gate().is_active("client-a"));
    }

    #[test]
    fn prompt_joins_context_sections_with_separator() {
        let hits = vec![
            ScoredChunk {
                chunk: chunk("a:0:0", "first section"),
                distance: 0.1,
            },
            ScoredChunk {
                chunk: chunk("a:0:1", "second section"),
                distance: 0.2,
            },
        ];

        let prompt = build_prompt(&hits, "the question");

        assert!(prompt.contains("first section\n\n---\n\nsecond section"));
        assert!(prompt.ends_with("considering the above context: the question\n"));
    }
}
