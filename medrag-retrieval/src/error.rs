//! Error types for the `medrag-retrieval` crate.

use thiserror::Error;

/// Errors that can occur while building or querying a corpus.
#[derive(Debug, Error)]
pub enum RagError {
    /// An upstream record could not be acquired or was malformed.
    ///
    /// The corpus builder logs these and skips the record; the build continues.
    #[error("Acquisition error ({record}): {message}")]
    Acquisition {
        /// Identifier of the failing record (code, file name, line number).
        record: String,
        /// A description of the failure.
        message: String,
    },

    /// The index and metadata of a corpus disagree at persist time.
    ///
    /// Fatal: the build is aborted and no artifacts are written.
    #[error("Build integrity error in corpus '{corpus}': {message}")]
    BuildIntegrity {
        /// The corpus being built.
        corpus: String,
        /// A description of the mismatch.
        message: String,
    },

    /// A corpus could not be loaded or does not match the serving configuration.
    #[error("Corpus '{corpus}' unavailable: {message}")]
    CorpusLoad {
        /// The corpus that failed to load.
        corpus: String,
        /// A description of the failure.
        message: String,
    },

    /// Caller-supplied input was rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector did not have the dimension the index was built with.
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error outside of artifact persistence.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error outside of artifact persistence.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    pub(crate) fn acquisition(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acquisition { record: record.into(), message: message.into() }
    }

    pub(crate) fn build_integrity(corpus: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildIntegrity { corpus: corpus.into(), message: message.into() }
    }

    pub(crate) fn corpus_load(corpus: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorpusLoad { corpus: corpus.into(), message: message.into() }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquisition { .. } => "acquisition_error",
            Self::BuildIntegrity { .. } => "build_integrity_error",
            Self::CorpusLoad { .. } => "corpus_load_error",
            Self::Validation(_) => "validation_error",
            Self::Embedding { .. } => "embedding_error",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
