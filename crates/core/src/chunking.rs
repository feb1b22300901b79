use crate::error::IngestError;
use crate::models::{DocumentFingerprint, DraftChunk, PageText};

/// Sizes are in characters. Chunk k+1 starts `window_chars - overlap_chars`
/// characters after chunk k.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub window_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_chars: 2_000,
            overlap_chars: 500,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.window_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "window_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.window_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than window {}",
                self.overlap_chars, self.window_chars
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.window_chars - self.overlap_chars
    }
}

/// Splits a document's pages into overlapping character windows.
///
/// The returned iterator is lazy and can be rebuilt from the same inputs to
/// restart the sequence; chunks come out in document order, page by page.
pub fn split_document<'a>(
    document: &'a DocumentFingerprint,
    pages: &'a [PageText],
    config: ChunkerConfig,
) -> WindowChunks<'a> {
    WindowChunks {
        document,
        pages,
        config,
        next_page: 0,
        current: None,
    }
}

#[derive(Debug, Clone)]
pub struct WindowChunks<'a> {
    document: &'a DocumentFingerprint,
    pages: &'a [PageText],
    config: ChunkerConfig,
    next_page: usize,
    current: Option<PageWindows>,
}

#[derive(Debug, Clone)]
struct PageWindows {
    page: u32,
    chars: Vec<char>,
    start: usize,
    exhausted: bool,
}

impl<'a> Iterator for WindowChunks<'a> {
    type Item = DraftChunk;

    fn next(&mut self) -> Option<DraftChunk> {
        loop {
            if self.current.is_none() {
                let page = self.pages.get(self.next_page)?;
                self.next_page += 1;
                if page.text.is_empty() {
                    continue;
                }
                self.current = Some(PageWindows {
                    page: page.page,
                    chars: page.text.chars().collect(),
                    start: 0,
                    exhausted: false,
                });
            }

            if self.current.as_ref().is_some_and(|windows| windows.exhausted) {
                self.current = None;
                continue;
            }

            if let Some(windows) = &mut self.current {
                let end = (windows.start + self.config.window_chars).min(windows.chars.len());
                let text: String = windows.chars[windows.start..end].iter().collect();
                let page = windows.page;

                if end == windows.chars.len() {
                    windows.exhausted = true;
                } else {
                    windows.start += self.config.step();
                }

                return Some(DraftChunk {
                    text,
                    source: self.document.source.clone(),
                    page,
                    checksum: self.document.checksum.clone(),
                });
            }
        }
    }
}
