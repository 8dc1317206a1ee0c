use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned status {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("invalid document url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document produced no text to index")]
    EmptyCorpus,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("document at {url} exceeds the {limit} byte download limit")]
    DocumentTooLarge { url: String, limit: u64 },

    #[error("background task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Malformed document bytes, as opposed to transport or storage trouble.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::PdfParse(_) | Self::DocxParse(_))
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no document has been indexed yet")]
    IndexNotFound,

    #[error("index generation {0} does not exist")]
    GenerationNotFound(u64),

    #[error("index at {path} is corrupt: {details}")]
    Corrupt { path: String, details: String },

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with embedder {indexed}, query embedder is {query}")]
    EmbedderMismatch { indexed: String, query: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not claim a new generation number after {0} attempts")]
    PublishContention(usize),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation credential is not configured (set COHERE_API_KEY)")]
    MissingCredential,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("generation timed out after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
