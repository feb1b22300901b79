use crate::error::IngestError;
use crate::models::PageText;
use lopdf::Document;
use std::path::Path;

/// Source of page text for one document.
///
/// Implementations must be deterministic: extracting the same file twice
/// yields the same pages in the same order.
pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        // Page numbers are zero-based positions in the document, counting
        // empty pages, so chunk ids stay stable when a blank page gains text.
        let mut pages = Vec::new();
        for (position, (page_no, _object_id)) in document.get_pages().into_iter().enumerate() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if text.trim().is_empty() {
                continue;
            }

            pages.push(PageText {
                page: position as u32,
                text,
            });
        }

        // A document with no readable text yields zero chunks, not an error.
        Ok(pages)
    }
}
