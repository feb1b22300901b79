use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunker config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion queue rejected job: {0}")]
    QueueRejected(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("index not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("client {0} already has a query in flight")]
    AlreadyActive(String),

    #[error("index is not initialized yet")]
    IndexUninitialized,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("generation service unreachable: {0}")]
    GenerationUnreachable(String),

    #[error("generation stream failed: {0}")]
    Streaming(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
