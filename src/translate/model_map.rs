//! Resolve Claude model names to destination model identifiers.
//!
//! Exact-name aliases from the config win; otherwise the model family keyword
//! decides: haiku goes to the small model, sonnet to the middle one, and opus
//! or anything unrecognised to the big one.

use std::collections::HashMap;

use crate::config::ModelsConfig;

#[derive(Debug, Clone)]
pub struct ModelMapper {
    big: String,
    middle: String,
    small: String,
    aliases: HashMap<String, String>,
}

impl ModelMapper {
    pub fn new(big: impl Into<String>, middle: impl Into<String>, small: impl Into<String>) -> Self {
        Self {
            big: big.into(),
            middle: middle.into(),
            small: small.into(),
            aliases: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn from_config(models: &ModelsConfig) -> Self {
        Self::new(
            models.big.clone(),
            models.effective_middle(),
            models.small.clone(),
        )
        .with_aliases(models.aliases.clone())
    }

    /// Destination model for a Claude model name. Never fails.
    #[must_use]
    pub fn resolve(&self, source_model: &str) -> &str {
        if let Some(alias) = self.aliases.get(source_model) {
            return alias;
        }

        let lowered = source_model.to_lowercase();
        if lowered.contains("haiku") {
            &self.small
        } else if lowered.contains("opus") {
            &self.big
        } else if lowered.contains("sonnet") {
            &self.middle
        } else {
            &self.big
        }
    }

    pub fn big(&self) -> &str {
        &self.big
    }

    pub fn middle(&self) -> &str {
        &self.middle
    }

    pub fn small(&self) -> &str {
        &self.small
    }
}
