//! The configuration file shared by every subcommand.

use std::path::Path;

use anyhow::{Context, Result};
use medrag_retrieval::{CorpusConfig, EngineConfig};
use medrag_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Engine settings plus the optional `session` section.
///
/// ```json
/// {
///   "corpora": [{ "name": "guidelines", "kind": "guidelines", ... }],
///   "retrieval": { "default_top_k": 5 },
///   "session": { "corpus": "guidelines", "top_k": 5 }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("invalid configuration")?;
        config.engine.validate()?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// The configured corpus called `name`.
    pub fn corpus(&self, name: &str) -> Result<&CorpusConfig> {
        self.engine.corpus(name).with_context(|| {
            let known: Vec<&str> = self.engine.corpora.iter().map(|c| c.name.as_str()).collect();
            format!("no corpus named '{name}' in configuration (known: {})", known.join(", "))
        })
    }

    /// The embedding dimension shared by every corpus, if any are configured.
    ///
    /// One process talks to one embedding model, so all corpora must agree.
    pub fn embedding_dimension(&self) -> Result<Option<usize>> {
        let mut dims = self.engine.corpora.iter().map(|c| (c.name.as_str(), c.dimension));
        let Some((_, first)) = dims.next() else {
            return Ok(None);
        };
        if let Some((name, other)) = dims.find(|(_, d)| *d != first) {
            anyhow::bail!("corpus '{name}' has dimension {other}, other corpora use {first}");
        }
        Ok(Some(first))
    }
}
