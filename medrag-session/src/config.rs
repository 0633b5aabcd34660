//! Elicitation session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Opening message of every session.
pub const DEFAULT_GREETING: &str =
    "Hello! I'm here to help assess your symptoms. How are you feeling today?";

fn default_corpus() -> String {
    "guidelines".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_collaborator_timeout_secs() -> u64 {
    60
}

fn default_parse_retries() -> u32 {
    1
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

/// Parameters of the [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Corpus queried when a session completes.
    #[serde(default = "default_corpus")]
    pub corpus: String,
    /// Number of results fetched on completion.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on one collaborator call.
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,
    /// Extra collaborator calls after a malformed answer.
    #[serde(default = "default_parse_retries")]
    pub parse_retries: u32,
    /// Longest accepted user message, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Opening assistant message.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            corpus: default_corpus(),
            top_k: default_top_k(),
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
            parse_retries: default_parse_retries(),
            max_message_chars: default_max_message_chars(),
            greeting: default_greeting(),
        }
    }
}

impl SessionConfig {
    /// The collaborator timeout as a [`Duration`].
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for a blank corpus or greeting and
    /// for zero `top_k`, timeout, or message length.
    pub fn validate(&self) -> Result<()> {
        if self.corpus.trim().is_empty() {
            return Err(SessionError::Validation("session corpus must not be empty".into()));
        }
        if self.greeting.trim().is_empty() {
            return Err(SessionError::Validation("greeting must not be empty".into()));
        }
        if self.top_k == 0 || self.collaborator_timeout_secs == 0 || self.max_message_chars == 0 {
            return Err(SessionError::Validation(
                "top_k, collaborator_timeout_secs and max_message_chars must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"corpus": "case_abstracts"}"#).unwrap();
        assert_eq!(config.corpus, "case_abstracts");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.parse_retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        let config = SessionConfig { top_k: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(SessionError::Validation(_))));
    }
}
