//! Data types for documents, chunks, index records, and search results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Document attributes. A `None` value is persisted as JSON `null`.
pub type Attributes = BTreeMap<String, Option<String>>;

/// Number of hex characters kept from a content hash when deriving a document id.
const CONTENT_ID_LEN: usize = 16;

/// A unit of source knowledge, created by the corpus builder and immutable afterwards.
///
/// For code corpora `id` is the code itself; for free-text corpora it is a
/// content hash (see [`Document::content_id`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Dedup key of the document.
    pub id: String,
    /// The text that gets chunked and embedded.
    pub text: String,
    /// Descriptive attributes copied into every metadata record of this document.
    pub attributes: Attributes,
}

impl Document {
    /// Create a document with no attributes.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), attributes: Attributes::new() }
    }

    /// Add or replace an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Return an attribute value, if set and non-null.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_deref())
    }

    /// Derive a stable id from document text.
    pub fn content_id(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        hash[..CONTENT_ID_LEN].to_string()
    }
}

/// A bounded text window cut from a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// The id of the parent [`Document`].
    pub parent_document_id: String,
    /// Position of the chunk within its parent. Traceability only; never used for ranking.
    pub ordinal: usize,
    /// The text that gets embedded.
    pub text: String,
}

/// The metadata entry describing the vector at the same position in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    /// The id of the document the chunk came from.
    pub document_id: String,
    /// The chunk's ordinal within that document.
    pub chunk_ordinal: usize,
    /// The embedded text.
    pub text: String,
    /// Attributes inherited from the parent document.
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl IndexRecord {
    /// Build the record for a chunk of `document`.
    pub fn for_chunk(document: &Document, chunk: &Chunk) -> Self {
        Self {
            document_id: document.id.clone(),
            chunk_ordinal: chunk.ordinal,
            text: chunk.text.clone(),
            attributes: document.attributes.clone(),
        }
    }

    /// Return an attribute value, if set and non-null.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_deref())
    }
}

/// A retrieved [`IndexRecord`] with its score under the corpus metric.
///
/// For inner-product corpora the score is a cosine similarity (higher is closer);
/// for L2 corpora it is a squared Euclidean distance (lower is closer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The metadata record of the hit.
    pub record: IndexRecord,
    /// The score assigned by the index.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_stable_and_short() {
        let a = Document::content_id("chest pain radiating to the left arm");
        let b = Document::content_id("chest pain radiating to the left arm");
        let c = Document::content_id("headache");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), CONTENT_ID_LEN);
    }

    #[test]
    fn index_record_flattens_attributes() {
        let doc = Document::new("J10", "J10 Influenza")
            .with_attribute("code", Some("J10".into()))
            .with_attribute("valid", None);
        let chunk = Chunk { parent_document_id: "J10".into(), ordinal: 0, text: doc.text.clone() };
        let record = IndexRecord::for_chunk(&doc, &chunk);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["document_id"], "J10");
        assert_eq!(json["code"], "J10");
        assert!(json["valid"].is_null());

        let back: IndexRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
