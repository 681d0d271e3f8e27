//! Plain text documents: title, word count and the text itself.

use super::{
    ExtractedMetadata, ExtractionFailure, Extractor, ModuleInfo, read_prefix, truncate_utf8,
};
use crate::types::Term;
use crate::vocab::{
    GRAPH_DOCUMENTS, MAX_LITERAL_LENGTH, NFO_DOCUMENT, NFO_PLAIN_TEXT_DOCUMENT, NFO_WORD_COUNT,
    NIE_PLAIN_TEXT_CONTENT, NIE_TITLE,
};
use std::path::Path;

/// Bytes read from the start of a text file.
const MAX_TEXT_BYTES: u64 = 1024 * 1024;

const MAX_TITLE_LENGTH: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "text",
            version: 1,
            graph: GRAPH_DOCUMENTS,
            mime_types: &["text/*"],
        }
    }

    fn extract(&self, path: &Path, _mime: &str) -> Result<ExtractedMetadata, ExtractionFailure> {
        let bytes = read_prefix(path, MAX_TEXT_BYTES)?;
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            // Cut in the middle of a character by the read limit.
            Err(e) if e.error_len().is_none() => {
                std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default()
            }
            Err(e) => {
                return Err(ExtractionFailure::Malformed(format!(
                    "not UTF-8 text at byte {}",
                    e.valid_up_to()
                )));
            }
        };

        let mut metadata = ExtractedMetadata::of_types(&[NFO_PLAIN_TEXT_DOCUMENT, NFO_DOCUMENT]);
        if let Some(title) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
            let title = title.trim_start_matches('#').trim();
            if !title.is_empty() {
                metadata.set(
                    NIE_TITLE,
                    Term::literal(truncate_utf8(title, MAX_TITLE_LENGTH)),
                );
            }
        }
        let words = text.split_whitespace().count();
        metadata.set(NFO_WORD_COUNT, Term::Integer(words as i64));
        if !text.is_empty() {
            metadata.set(
                NIE_PLAIN_TEXT_CONTENT,
                Term::literal(truncate_utf8(text, MAX_LITERAL_LENGTH)),
            );
        }
        Ok(metadata)
    }
}
