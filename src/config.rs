use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Set for Azure-style deployments: sent as `?api-version=` plus an `api-key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Use the caller's `x-api-key` / bearer token for the provider call when present.
    #[serde(default = "default_true")]
    pub forward_client_credential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_big_model")]
    pub big: String,
    /// Falls back to `big` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
    #[serde(default = "default_small_model")]
    pub small: String,
    /// Exact Claude model names mapped to a specific destination model.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_tokens_limit")]
    pub max_tokens_limit: u64,
    /// Reject over-limit `max_tokens` instead of clamping it.
    #[serde(default)]
    pub reject_oversized_max_tokens: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_request_budget_bytes")]
    pub request_budget_bytes: usize,
    /// Largest inbound body accepted, checked against `Content-Length`.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

fn default_big_model() -> String {
    "gpt-4o".to_string()
}

fn default_small_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens_limit() -> u64 {
    4096
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_request_budget_bytes() -> usize {
    crate::translate::budget::DEFAULT_REQUEST_BUDGET_BYTES
}

fn default_max_request_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            provider: ProviderConfig::default(),
            models: ModelsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_version: None,
            forward_client_credential: true,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            big: default_big_model(),
            middle: None,
            small: default_small_model(),
            aliases: HashMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tokens_limit: default_max_tokens_limit(),
            reject_oversized_max_tokens: false,
            request_timeout_secs: default_request_timeout_secs(),
            request_budget_bytes: default_request_budget_bytes(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl ModelsConfig {
    pub fn effective_middle(&self) -> String {
        self.middle.clone().unwrap_or_else(|| self.big.clone())
    }
}

impl ProxyConfig {
    /// Load config from a TOML file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, then apply environment overrides.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load(path)?,
            None => match config_search_paths().into_iter().find(|p| p.exists()) {
                Some(candidate) => {
                    tracing::info!(path = %candidate.display(), "Loading config");
                    Self::load(&candidate)?
                }
                None => {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply the environment overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(version) = lookup("AZURE_API_VERSION") {
            self.provider.api_version = Some(version);
        }
        if let Some(model) = lookup("BIG_MODEL") {
            self.models.big = model;
        }
        if let Some(model) = lookup("MIDDLE_MODEL") {
            self.models.middle = Some(model);
        }
        if let Some(model) = lookup("SMALL_MODEL") {
            self.models.small = model;
        }
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", &port)?;
        }
        if let Some(limit) = lookup("MAX_TOKENS_LIMIT") {
            self.limits.max_tokens_limit = parse_env("MAX_TOKENS_LIMIT", &limit)?;
        }
        if let Some(timeout) = lookup("REQUEST_TIMEOUT") {
            self.limits.request_timeout_secs = parse_env("REQUEST_TIMEOUT", &timeout)?;
        }
        Ok(())
    }

    /// Provider key from the configured environment variable, if set.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ProxyError::config(format!("Environment variable {key} has invalid value '{value}'"))
    })
}

/// Candidate config file locations, in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("claude-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".claude-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[provider]
base_url = "https://example.openai.azure.com/openai/deployments/gpt4"
api_version = "2024-02-01"

[models]
big = "gpt-4.1"
small = "gpt-4.1-mini"

[models.aliases]
"claude-3-haiku-20240307" = "tiny"

[limits]
max_tokens_limit = 8192
"#
        )
        .unwrap();

        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.provider.api_version.as_deref(), Some("2024-02-01"));
        assert!(config.provider.forward_client_credential);
        assert_eq!(config.models.effective_middle(), "gpt-4.1");
        assert_eq!(
            config.models.aliases.get("claude-3-haiku-20240307"),
            Some(&"tiny".to_string())
        );
        assert_eq!(config.limits.max_tokens_limit, 8192);
        assert_eq!(config.limits.request_timeout_secs, 90);
        assert_eq!(config.limits.request_budget_bytes, 800_000);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 8082);
        assert_eq!(config.provider.base_url, "https://api.openai.com/v1");
        assert_eq!(config.provider.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.models.big, "gpt-4o");
        assert_eq!(config.models.small, "gpt-4o-mini");
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("BIG_MODEL", "big"),
            ("MIDDLE_MODEL", "mid"),
            ("MAX_TOKENS_LIMIT", "16000"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
        ]);
        let mut config = ProxyConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.models.big, "big");
        assert_eq!(config.models.effective_middle(), "mid");
        assert_eq!(config.limits.max_tokens_limit, 16000);
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = ProxyConfig::default();
        let err = config
            .apply_env(|k| (k == "PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let err = ProxyConfig::find_and_load(Some(Path::new("/nonexistent/claude-bridge.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
