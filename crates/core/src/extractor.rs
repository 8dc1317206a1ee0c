use crate::error::IngestError;
use crate::models::DocumentFormat;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

const DOCX_BODY_PART: &str = "word/document.xml";

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    /// Pages whose extraction yields only whitespace are dropped.
    pub fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if text.trim().is_empty() {
                debug!(page = page_no, "pdf page has no text");
            } else {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        debug!(pages = pages.len(), "extracted pdf pages");
        Ok(pages)
    }
}

impl TextExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let pages = self.extract_pages(bytes)?;
        if let (Some(first), Some(last)) = (pages.first(), pages.last()) {
            debug!(first = first.number, last = last.number, "joining pdf pages");
        }
        Ok(pages
            .into_iter()
            .map(|page| page.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[derive(Default)]
pub struct DocxExtractor;

impl DocxExtractor {
    /// Body-level paragraphs in document order, empty ones included. Paragraphs nested in
    /// tables or text boxes are not part of the body sequence.
    pub fn extract_paragraphs(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name(DOCX_BODY_PART)
            .map_err(|error| IngestError::DocxParse(format!("{DOCX_BODY_PART}: {error}")))?
            .read_to_string(&mut xml)
            .map_err(|error| IngestError::DocxParse(format!("{DOCX_BODY_PART}: {error}")))?;

        parse_document_xml(&xml)
    }
}

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        Ok(self.extract_paragraphs(bytes)?.join("\n"))
    }
}

fn parse_document_xml(xml: &str) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut paragraph_depth = 0usize;
    let mut nested_depth = 0usize;
    let mut in_text_run = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;

        match event {
            Event::Start(element) => match element.name().as_ref() {
                b"w:tbl" | b"w:txbxContent" => nested_depth += 1,
                b"w:p" => {
                    paragraph_depth += 1;
                    if paragraph_depth == 1 && nested_depth == 0 {
                        current.clear();
                    }
                }
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Event::End(element) => match element.name().as_ref() {
                b"w:tbl" | b"w:txbxContent" => nested_depth = nested_depth.saturating_sub(1),
                b"w:p" => {
                    if paragraph_depth == 1 && nested_depth == 0 {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    paragraph_depth = paragraph_depth.saturating_sub(1);
                }
                b"w:t" => in_text_run = false,
                _ => {}
            },
            Event::Empty(element) => {
                let in_body_paragraph = paragraph_depth == 1 && nested_depth == 0;
                match element.name().as_ref() {
                    b"w:p" if nested_depth == 0 && paragraph_depth == 0 => {
                        paragraphs.push(String::new())
                    }
                    b"w:tab" if in_body_paragraph => current.push('\t'),
                    b"w:br" | b"w:cr" if in_body_paragraph => current.push('\n'),
                    _ => {}
                }
            }
            Event::Text(text) if in_text_run && paragraph_depth == 1 && nested_depth == 0 => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::DocxParse(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

/// Extracts plain text from document bytes given the declared extension (`.pdf` / `.docx`).
/// Any other extension yields an empty string rather than an error.
pub fn extract_text(bytes: &[u8], declared_extension: &str) -> Result<String, IngestError> {
    match DocumentFormat::from_extension(declared_extension) {
        Some(format) => extract_format(bytes, format),
        None => {
            warn!(
                extension = declared_extension,
                "unrecognised document extension, no text extracted"
            );
            Ok(String::new())
        }
    }
}

pub fn extractor_for(format: DocumentFormat) -> &'static dyn TextExtractor {
    match format {
        DocumentFormat::Pdf => &LopdfExtractor,
        DocumentFormat::Docx => &DocxExtractor,
    }
}

pub fn extract_format(bytes: &[u8], format: DocumentFormat) -> Result<String, IngestError> {
    extractor_for(format).extract(bytes)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{docx_with_body, docx_with_paragraphs, pdf_with_pages};
    use super::*;

    #[test]
    fn docx_paragraphs_are_joined_with_newlines_including_empty_ones() {
        let bytes = docx_with_paragraphs(&[
            "Claim approved for $500",
            "",
            "due to policy clause 4.2.",
        ]);

        let text = extract_text(&bytes, ".docx").expect("docx should parse");
        assert_eq!(text, "Claim approved for $500\n\ndue to policy clause 4.2.");
    }

    #[test]
    fn docx_runs_tabs_and_entities_are_preserved() {
        let body = concat!(
            "<w:p><w:r><w:t>Sum</w:t></w:r><w:r><w:tab/><w:t>A &amp; B</w:t></w:r></w:p>",
            "<w:p/>",
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>table cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
            "<w:p><w:r><w:t>End</w:t></w:r></w:p>",
        );
        let bytes = docx_with_body(body);

        let paragraphs = DocxExtractor
            .extract_paragraphs(&bytes)
            .expect("docx should parse");
        assert_eq!(paragraphs, vec!["Sum\tA & B", "", "End"]);
    }

    #[test]
    fn docx_without_body_part_is_a_parse_error() {
        let error = extract_text(b"PK\x03\x04 not really a zip", ".docx")
            .expect_err("garbage must not parse");
        assert!(error.is_parse_error());
    }

    #[test]
    fn pdf_pages_without_text_are_skipped() {
        let bytes = pdf_with_pages(&["Policy schedule", "", "Clause 4.2 covers hospital stays"]);

        let pages = LopdfExtractor
            .extract_pages(&bytes)
            .expect("pdf should parse");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].number, 3);
        assert!(pages[0].text.contains("Policy schedule"));
        assert!(pages[1].text.contains("Clause 4.2"));

        let text = extract_text(&bytes, ".pdf").expect("pdf should parse");
        assert!(text.contains("Policy schedule"));
        assert!(text.contains("Clause 4.2 covers hospital stays"));
    }

    #[test]
    fn malformed_pdf_is_a_parse_error() {
        let error = extract_text(b"%PDF-1.4\n%broken", ".pdf").expect_err("broken pdf");
        assert!(matches!(error, IngestError::PdfParse(_)));
    }

    #[test]
    fn unknown_extension_yields_empty_text() {
        let text = extract_text(b"plain words", ".txt").expect("fallback is not an error");
        assert!(text.is_empty());
    }
}
