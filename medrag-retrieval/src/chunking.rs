//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`WordWindowChunker`]: overlapping fixed-size word windows (guidelines, case abstracts)
//! - [`WholeDocumentChunker`]: one chunk per document (code corpora)
//!
//! [`ChunkPolicy`] is the serializable form stored in a corpus configuration.

use serde::{Deserialize, Serialize};

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks, ordinals starting at zero.
    ///
    /// Returns an empty `Vec` if the document has no words; callers must
    /// tolerate documents that contribute zero vectors.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Split `text` into overlapping windows of `size` words.
///
/// Window `k` starts at word `k * (size - overlap)` and ends at
/// `min(start + size, word_count)`. Splitting stops at the first window that
/// reaches the end of the text, so the last window may be shorter than `size`.
/// Words are rejoined with single spaces.
///
/// # Errors
///
/// Returns [`RagError::Validation`] if `size == 0` or `overlap >= size`.
///
/// # Example
///
/// ```rust
/// use medrag_retrieval::chunking::chunk_words;
///
/// let chunks = chunk_words("a b c d e", 3, 1).unwrap();
/// assert_eq!(chunks, vec!["a b c", "c d e"]);
/// ```
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    validate_window(size, overlap)?;

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    if words.is_empty() {
        return Ok(chunks);
    }

    let step = size - overlap;
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

fn validate_window(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(RagError::Validation("chunk size must be greater than zero".to_string()));
    }
    if overlap >= size {
        return Err(RagError::Validation(format!(
            "chunk overlap ({overlap}) must be less than chunk size ({size})"
        )));
    }
    Ok(())
}

/// Splits documents into overlapping word windows.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_retrieval::WordWindowChunker;
///
/// let chunker = WordWindowChunker::new(500, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct WordWindowChunker {
    size: usize,
    overlap: usize,
}

impl WordWindowChunker {
    /// Create a new `WordWindowChunker`.
    ///
    /// # Arguments
    ///
    /// * `size`: maximum number of words per chunk
    /// * `overlap`: number of words shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] if `size == 0` or `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        validate_window(size, overlap)?;
        Ok(Self { size, overlap })
    }
}

impl Chunker for WordWindowChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        // Parameters were validated in `new`.
        let windows = chunk_words(&document.text, self.size, self.overlap).unwrap_or_default();
        windows
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk {
                parent_document_id: document.id.clone(),
                ordinal,
                text,
            })
            .collect()
    }
}

/// Emits each non-empty document as a single chunk, text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeDocumentChunker;

impl Chunker for WholeDocumentChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.text.trim().is_empty() {
            return Vec::new();
        }
        vec![Chunk { parent_document_id: document.id.clone(), ordinal: 0, text: document.text.clone() }]
    }
}

/// The chunking policy of a corpus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// One chunk per document.
    Whole,
    /// Overlapping word windows.
    Words {
        /// Window size in words.
        size: usize,
        /// Words shared by consecutive windows.
        overlap: usize,
    },
}

impl ChunkPolicy {
    /// Check the policy parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Whole => Ok(()),
            Self::Words { size, overlap } => validate_window(*size, *overlap),
        }
    }

    /// Instantiate the chunker for this policy.
    pub fn chunker(&self) -> Result<Box<dyn Chunker>> {
        match self {
            Self::Whole => Ok(Box::new(WholeDocumentChunker)),
            Self::Words { size, overlap } => Ok(Box::new(WordWindowChunker::new(*size, *overlap)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn window_boundaries_for_1200_words() {
        let text = numbered_words(1200);
        let chunks = chunk_words(&text, 500, 50).unwrap();
        assert_eq!(chunks.len(), 3);

        let bounds: Vec<(String, String, usize)> = chunks
            .iter()
            .map(|c| {
                let words: Vec<&str> = c.split(' ').collect();
                (words[0].to_string(), words[words.len() - 1].to_string(), words.len())
            })
            .collect();
        assert_eq!(bounds[0], ("w0".to_string(), "w499".to_string(), 500));
        assert_eq!(bounds[1], ("w450".to_string(), "w949".to_string(), 500));
        assert_eq!(bounds[2], ("w900".to_string(), "w1199".to_string(), 300));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_words("fever and cough", 10, 0).unwrap();
        assert_eq!(chunks, vec!["fever and cough"]);

        let exact = numbered_words(10);
        assert_eq!(chunk_words(&exact, 10, 3).unwrap(), vec![exact.clone()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_words("", 10, 2).unwrap().is_empty());
        assert!(chunk_words("  \n\t ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn stops_when_window_reaches_end() {
        // 950 words: the second window already ends at the last word.
        let chunks = chunk_words(&numbered_words(950), 500, 50).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn rejects_invalid_windows() {
        assert!(matches!(chunk_words("a b", 0, 0), Err(RagError::Validation(_))));
        assert!(matches!(chunk_words("a b", 5, 5), Err(RagError::Validation(_))));
        assert!(WordWindowChunker::new(5, 7).is_err());
        assert!(ChunkPolicy::Words { size: 3, overlap: 3 }.validate().is_err());
    }

    #[test]
    fn chunker_assigns_ordinals_and_parent() {
        let doc = Document::new("doc-1", numbered_words(25));
        let chunks = WordWindowChunker::new(10, 0).unwrap().chunk(&doc);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.parent_document_id, "doc-1");
        }
    }

    #[test]
    fn whole_document_chunker_skips_blank_text() {
        assert!(WholeDocumentChunker.chunk(&Document::new("x", "   ")).is_empty());
        let chunks = WholeDocumentChunker.chunk(&Document::new("A09", "A09 Diarrhoea"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A09 Diarrhoea");
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy: ChunkPolicy =
            serde_json::from_str(r#"{"type":"words","size":500,"overlap":50}"#).unwrap();
        assert_eq!(policy, ChunkPolicy::Words { size: 500, overlap: 50 });
        let whole: ChunkPolicy = serde_json::from_str(r#"{"type":"whole"}"#).unwrap();
        assert_eq!(whole, ChunkPolicy::Whole);
    }
}
