use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Accepts `pdf`, `.pdf`, `PDF` and the docx equivalents.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let normalized = extension.trim().trim_start_matches('.');
        if normalized.eq_ignore_ascii_case("pdf") {
            Some(Self::Pdf)
        } else if normalized.eq_ignore_ascii_case("docx") {
            Some(Self::Docx)
        } else {
            None
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Resolves the format of a remote document. The URL path's extension wins; URLs without
    /// one (signed blob links and the like) are PDF when `.pdf` appears anywhere, DOCX otherwise.
    pub fn from_url(url: &url::Url) -> Self {
        let last_segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();

        if let Some(format) = Self::from_file_name(last_segment) {
            return format;
        }

        if url.as_str().to_lowercase().contains(".pdf") {
            Self::Pdf
        } else {
            Self::Docx
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Raw bytes of a document awaiting ingestion.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub position: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub generation: u64,
    pub document_name: String,
    pub format: DocumentFormat,
    pub chunk_count: usize,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::DocumentFormat;

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert_eq!(DocumentFormat::from_extension(".PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension(".txt"), None);
        assert_eq!(DocumentFormat::from_file_name("policy.Docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_file_name("README"), None);
    }

    #[test]
    fn url_format_prefers_path_extension() -> Result<(), url::ParseError> {
        let docx = url::Url::parse("https://example.com/files/policy.docx?sig=a.pdf")?;
        assert_eq!(DocumentFormat::from_url(&docx), DocumentFormat::Docx);

        let blob = url::Url::parse("https://blob.example.com/download?name=policy.pdf")?;
        assert_eq!(DocumentFormat::from_url(&blob), DocumentFormat::Pdf);

        let opaque = url::Url::parse("https://blob.example.com/download/12345")?;
        assert_eq!(DocumentFormat::from_url(&opaque), DocumentFormat::Docx);
        Ok(())
    }
}
