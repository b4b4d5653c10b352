//! Placeholder language model

use async_trait::async_trait;
use voxbridge_core::Result;

use crate::types::{ChatMessage, EngineError, LanguageModel, Role};

/// Answers `"<prefix><last user message>"`
#[derive(Debug, Clone)]
pub struct EchoLanguageModel {
    prefix: String,
}

impl EchoLanguageModel {
    /// Echo model with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EchoLanguageModel {
    fn default() -> Self {
        Self::with_prefix("Response to: ")
    }
}

#[async_trait]
impl LanguageModel for EchoLanguageModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn respond(&self, history: &[ChatMessage]) -> Result<String> {
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| EngineError::Generation("no user message in history".to_string()))?;
        Ok(format!("{}{}", self.prefix, last_user.content))
    }
}
