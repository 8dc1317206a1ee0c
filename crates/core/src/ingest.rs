use crate::chunking::{chunk_text, ChunkingConfig};
use crate::error::IngestError;
use crate::extractor::extract_format;
use crate::models::{DocumentFormat, SourceDocument};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Builds a document from uploaded bytes. The format comes from the file name's extension;
/// anything other than `.pdf` / `.docx` is rejected here rather than indexed as empty text.
pub fn document_from_upload(name: &str, bytes: Vec<u8>) -> Result<SourceDocument, IngestError> {
    let format = DocumentFormat::from_file_name(name)
        .ok_or_else(|| IngestError::UnsupportedFormat(name.to_string()))?;

    Ok(SourceDocument {
        name: name.to_string(),
        format,
        bytes,
    })
}

/// Extracts and chunks a document. Runs synchronously; callers on an async runtime should
/// move it onto a blocking thread.
pub fn prepare_chunks(
    document: &SourceDocument,
    config: ChunkingConfig,
) -> Result<Vec<String>, IngestError> {
    let text = extract_format(&document.bytes, document.format)?;
    let chunks = chunk_text(&text, config)?;

    debug!(
        document = %document.name,
        format = %document.format,
        text_chars = text.chars().count(),
        chunks = chunks.len(),
        "prepared chunks"
    );
    Ok(chunks)
}

pub struct Downloader {
    client: Client,
    max_bytes: u64,
}

impl Downloader {
    /// Client bounded by `timeout` per download, accepting at most `max_bytes` of body.
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, IngestError> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .user_agent(concat!("doc-qa/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|source| IngestError::Download {
                url: String::new(),
                source,
            })?;
        Ok(Self { client, max_bytes })
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<SourceDocument, IngestError> {
        let url = Url::parse(raw_url.trim())?;
        let format = DocumentFormat::from_url(&url);
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("document{}", format.extension()));

        let download_error = |source| IngestError::Download {
            url: url.to_string(),
            source,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(download_error)?;

        if !response.status().is_success() {
            return Err(IngestError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let too_large = || IngestError::DocumentTooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|declared| declared > self.max_bytes)
        {
            return Err(too_large());
        }

        // Content-Length may be absent or wrong, so the cap is enforced while reading too.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(download_error)? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        info!(url = %url, bytes = bytes.len(), format = %format, "downloaded document");

        Ok(SourceDocument {
            name,
            format,
            bytes,
        })
    }
}
