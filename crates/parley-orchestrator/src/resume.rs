//! Resume text extraction.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ParleyError, Result};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Turns an uploaded resume document into plain text.
#[async_trait]
pub trait ResumeExtractor: Send + Sync {
    /// Extracts text from `bytes`, using `content_type` as a hint.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty or oversized uploads and `Extraction`
    /// when no text can be recovered.
    async fn extract(&self, bytes: Vec<u8>, content_type: Option<&str>) -> Result<String>;
}

/// Extractor for PDF and UTF-8 text documents.
#[derive(Debug, Clone, Copy)]
pub struct DocumentExtractor {
    max_bytes: usize,
}

impl DocumentExtractor {
    /// Creates an extractor accepting uploads up to `max_bytes`.
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl ResumeExtractor for DocumentExtractor {
    async fn extract(&self, bytes: Vec<u8>, content_type: Option<&str>) -> Result<String> {
        if bytes.is_empty() {
            return Err(ParleyError::validation("resume upload is empty"));
        }
        if bytes.len() > self.max_bytes {
            return Err(ParleyError::validation(format!(
                "resume is {} bytes; the limit is {} bytes",
                bytes.len(),
                self.max_bytes
            )));
        }

        let is_pdf = content_type.is_some_and(|ct| ct.starts_with("application/pdf"))
            || bytes.starts_with(PDF_MAGIC);

        let raw = if is_pdf {
            debug!(size = bytes.len(), "Extracting PDF resume");
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                .await
                .map_err(|e| {
                    warn!(error = %e, "PDF extraction task failed");
                    ParleyError::extraction("the PDF could not be parsed")
                })?
                .map_err(|e| ParleyError::extraction(e.to_string()))?
        } else {
            String::from_utf8(bytes)
                .map_err(|_| ParleyError::extraction("document is neither PDF nor UTF-8 text"))?
        };

        let text = normalize_whitespace(&raw);
        if text.is_empty() {
            return Err(ParleyError::extraction("document contains no text"));
        }
        Ok(text)
    }
}

/// Collapses runs of spaces and tabs, trims every line and drops blank lines.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
