//! Turning acquired source records into deduplicated [`Document`]s.
//!
//! Acquisition (remote code tables, PDF extraction, literature search) happens
//! before this module; records arrive as `Result`s so that a failed or
//! malformed record is logged and skipped without stopping the build.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{Attributes, Document};
use crate::error::{RagError, Result};

/// `source` attribute of a code enriched by a detail lookup.
pub const SOURCE_ENRICHED: &str = "code_table+detail";
/// `source` attribute of a code built from the primary record alone.
pub const SOURCE_PRIMARY: &str = "code_table";

/// A primary code-table hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeRecord {
    /// The code, e.g. `I21.9`.
    pub code: String,
    /// Display name from the code table.
    #[serde(default)]
    pub name: String,
}

/// Per-code detail from a secondary source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeDetail {
    /// Long description.
    #[serde(default)]
    pub description: String,
    /// Whether the code is billable/valid.
    #[serde(default)]
    pub valid: Option<bool>,
    /// Inclusion terms.
    #[serde(default)]
    pub includes: Vec<String>,
    /// "Excludes1" notes.
    #[serde(default)]
    pub excludes_one: Vec<String>,
    /// "Excludes2" notes.
    #[serde(default)]
    pub excludes_two: Vec<String>,
    /// Code type (category, subcategory, ...).
    #[serde(default, rename = "type")]
    pub code_type: Option<String>,
}

impl CodeDetail {
    fn is_valid(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

/// Secondary per-code detail source.
///
/// `Ok(None)` means the source has no entry for the code; `Err` means the
/// lookup itself failed. Both fall back to the primary record.
#[async_trait]
pub trait DetailLookup: Send + Sync {
    /// Fetch detail for one code.
    async fn lookup(&self, code: &str) -> Result<Option<CodeDetail>>;
}

/// A [`DetailLookup`] backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct StaticDetailLookup {
    details: HashMap<String, CodeDetail>,
}

impl StaticDetailLookup {
    /// Create a lookup from a code → detail map.
    pub fn new(details: HashMap<String, CodeDetail>) -> Self {
        Self { details }
    }

    /// Load a JSON object mapping codes to details.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::new(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl DetailLookup for StaticDetailLookup {
    async fn lookup(&self, code: &str) -> Result<Option<CodeDetail>> {
        Ok(self.details.get(code).cloned())
    }
}

/// A free-text record: a guideline passage or a literature abstract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextRecord {
    /// Raw text; whitespace is normalized during the build.
    pub text: String,
    /// Attributes carried into every chunk's metadata.
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl TextRecord {
    /// A guideline passage extracted from the file named `source`.
    pub fn guideline(source: impl Into<String>, text: impl Into<String>) -> Self {
        let attributes = Attributes::from([("source".to_string(), Some(source.into()))]);
        Self { text: text.into(), attributes }
    }

    /// A literature abstract. `text` is built as `"{title}\n{abstract}"`.
    pub fn case_abstract(
        source: impl Into<String>,
        pmid: Option<String>,
        title: impl Into<String>,
        abstract_text: impl AsRef<str>,
        journal: Option<String>,
        publication_type: Option<String>,
    ) -> Self {
        let title = title.into();
        let text = format!("{title}\n{}", abstract_text.as_ref());
        let attributes = Attributes::from([
            ("source".to_string(), Some(source.into())),
            ("pmid".to_string(), pmid),
            ("title".to_string(), Some(title)),
            ("journal".to_string(), journal),
            ("publication_type".to_string(), publication_type),
            ("guideline_id".to_string(), None),
        ]);
        Self { text, attributes }
    }

    /// Tag the record with the identifier of the guideline it was taken from.
    pub fn with_guideline_id(mut self, guideline_id: Option<String>) -> Self {
        self.attributes.insert("guideline_id".to_string(), guideline_id);
        self
    }
}

/// Counters reported at the end of a build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStats {
    /// Documents kept.
    pub accepted: usize,
    /// Records dropped because their id was already seen.
    pub duplicates: usize,
    /// Records dropped because acquisition failed or the record was malformed.
    pub skipped: usize,
    /// Code documents enriched from the detail source.
    pub enriched: usize,
    /// Code documents that fell back to the primary record.
    pub fallbacks: usize,
}

/// Output of a corpus build: ordered documents plus statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltCorpus {
    /// Documents in first-seen order.
    pub documents: Vec<Document>,
    /// Build counters.
    pub stats: BuildStats,
}

/// Accumulates documents with first-occurrence-wins deduplication.
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = CorpusBuilder::new();
/// builder.add_code(CodeRecord { code: "J10".into(), name: "Influenza".into() }, Some(&lookup)).await;
/// builder.add_text(TextRecord::guideline("who_stroke.pdf", text));
/// let corpus = builder.finish();
/// ```
#[derive(Debug, Default)]
pub struct CorpusBuilder {
    documents: Vec<Document>,
    seen: HashSet<String>,
    stats: BuildStats,
}

impl CorpusBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquisition failure: logged and counted, the build continues.
    pub fn skip(&mut self, error: &RagError) {
        warn!(error = %error, "skipping source record");
        self.stats.skipped += 1;
    }

    /// Add a code record, enriching it through `lookup` when given.
    ///
    /// Returns `false` if the record was a duplicate or malformed. A failed or
    /// invalid lookup never drops the record.
    pub async fn add_code(&mut self, record: CodeRecord, lookup: Option<&dyn DetailLookup>) -> bool {
        let code = record.code.trim().to_string();
        if code.is_empty() {
            self.skip(&RagError::acquisition("<blank code>", "code record without a code"));
            return false;
        }
        if self.seen.contains(&code) {
            debug!(code = %code, "dropping duplicate code");
            self.stats.duplicates += 1;
            return false;
        }

        let (detail, status) = match lookup {
            None => (None, "not_requested"),
            Some(lookup) => match lookup.lookup(&code).await {
                Ok(Some(detail)) if detail.is_valid() => (Some(detail), "found"),
                Ok(Some(_)) => (None, "invalid"),
                Ok(None) => (None, "not_found"),
                Err(e) => {
                    warn!(code = %code, error = %e, "detail lookup failed, using primary record");
                    (None, "lookup_failed")
                }
            },
        };

        let name = record.name.trim().to_string();
        let document = code_document(&code, &name, detail.as_ref(), status);
        if detail.is_some() {
            self.stats.enriched += 1;
        } else {
            self.stats.fallbacks += 1;
        }
        self.push(code, document);
        true
    }

    /// Add a free-text record. Returns `false` for duplicates and blank texts.
    pub fn add_text(&mut self, record: TextRecord) -> bool {
        let text = clean_text(&record.text);
        if text.is_empty() {
            self.skip(&RagError::acquisition(
                record.attributes.get("source").cloned().flatten().unwrap_or_default(),
                "record has no text",
            ));
            return false;
        }
        let id = Document::content_id(&text);
        if self.seen.contains(&id) {
            debug!(document.id = %id, "dropping duplicate text");
            self.stats.duplicates += 1;
            return false;
        }

        let mut attributes = record.attributes;
        // Reserved by the metadata record shape.
        for reserved in ["text", "document_id", "chunk_ordinal"] {
            attributes.remove(reserved);
        }
        self.push(id.clone(), Document { id, text, attributes });
        true
    }

    fn push(&mut self, id: String, document: Document) {
        self.seen.insert(id);
        self.stats.accepted += 1;
        self.documents.push(document);
    }

    /// Finish the build.
    pub fn finish(self) -> BuiltCorpus {
        info!(
            accepted = self.stats.accepted,
            duplicates = self.stats.duplicates,
            skipped = self.stats.skipped,
            enriched = self.stats.enriched,
            fallbacks = self.stats.fallbacks,
            "corpus documents built"
        );
        BuiltCorpus { documents: self.documents, stats: self.stats }
    }
}

/// Build a code corpus from acquired records.
pub async fn build_code_corpus(
    sources: impl IntoIterator<Item = Result<CodeRecord>>,
    lookup: Option<&dyn DetailLookup>,
) -> BuiltCorpus {
    let mut builder = CorpusBuilder::new();
    for source in sources {
        match source {
            Ok(record) => {
                builder.add_code(record, lookup).await;
            }
            Err(e) => builder.skip(&e),
        }
    }
    builder.finish()
}

/// Build a free-text corpus from acquired records.
pub fn build_text_corpus(sources: impl IntoIterator<Item = Result<TextRecord>>) -> BuiltCorpus {
    let mut builder = CorpusBuilder::new();
    for source in sources {
        match source {
            Ok(record) => {
                builder.add_text(record);
            }
            Err(e) => builder.skip(&e),
        }
    }
    builder.finish()
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn code_document(code: &str, name: &str, detail: Option<&CodeDetail>, status: &str) -> Document {
    let description = detail.map(|d| d.description.trim().to_string()).unwrap_or_else(|| name.to_string());
    let text = format!("{code} {name}. {description}");
    let join = |items: Option<&Vec<String>>| items.filter(|v| !v.is_empty()).map(|v| v.join("; "));

    Document::new(code, text)
        .with_attribute("code", Some(code.to_string()))
        .with_attribute("name", Some(name.to_string()))
        .with_attribute("description", Some(description))
        .with_attribute("valid", detail.and_then(|d| d.valid).map(|v| v.to_string()))
        .with_attribute("includes", join(detail.map(|d| &d.includes)))
        .with_attribute("excludes_one", join(detail.map(|d| &d.excludes_one)))
        .with_attribute("excludes_two", join(detail.map(|d| &d.excludes_two)))
        .with_attribute("type", detail.and_then(|d| d.code_type.clone()))
        .with_attribute(
            "source",
            Some(if detail.is_some() { SOURCE_ENRICHED } else { SOURCE_PRIMARY }.to_string()),
        )
        .with_attribute("detail_status", Some(status.to_string()))
}
