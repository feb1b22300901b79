pub mod admission;
pub mod chunking;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod identity;
pub mod index;
pub mod ingest;
pub mod models;
pub mod query;
pub mod session;
pub mod stores;

pub use admission::{admit, AdmissionOutcome, EvictedDocument, MAX_BATCH_SIZE};
pub use chunking::{split_document, ChunkerConfig, WindowChunks};
pub use dedup::filter_new_chunks;
pub use embedding::{Embedder, HashedEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, IngestError, QueryError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use generation::{wait_until_ready, FragmentStream, OllamaGenerator, TextGenerator};
pub use identity::assign_ids;
pub use index::{ChunkIndex, IndexGuard};
pub use ingest::{
    digest_file, discover_pdf_files, fingerprint_document, run_ingestion, run_ingestion_worker,
    CoordinatorOutput, FailedDocument, IngestCoordinator, IngestJob, IngestionQueue, RunSummary,
};
pub use models::{
    Chunk, DocumentFingerprint, DraftChunk, IndexSnapshot, PageText, ScoredChunk,
};
pub use query::{build_prompt, QueryService, DEFAULT_TOP_K};
pub use session::{ActiveQuery, QueryGate};
pub use stores::{ChromaStore, MemoryIndex};
