//! TOML-based configuration system for llmerge.
//!
//! API keys are never stored in the file. Each provider section carries an
//! `api_key_env` field naming an environment variable, and the actual secrets
//! are resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::{ProviderConfig, ProviderKind};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
///
/// Every section is optional; an empty file (or no file at all) yields the
/// built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model selection and sampling settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Per-provider credentials and endpoints.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Concurrency and retry settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// File discovery filters.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// LLM selection
// ---------------------------------------------------------------------------

/// Model selection and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider to use: google, groq, or maritaca.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier. When absent the provider's default model is used.
    #[serde(default = "default_model")]
    pub model: Option<String>,

    /// Sampling temperature (0.0 to 2.0).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    std::env::var("DEFAULT_LLM_PROVIDER").unwrap_or_else(|_| "google".into())
}
fn default_model() -> Option<String> {
    std::env::var("DEFAULT_LLM_MODEL").ok()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Per-provider credentials and endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google: ProviderEntry,

    #[serde(default)]
    pub groq: ProviderEntry,

    #[serde(default)]
    pub maritaca: ProviderEntry,
}

impl ProvidersConfig {
    /// Section for the given provider.
    pub fn entry(&self, kind: ProviderKind) -> &ProviderEntry {
        match kind {
            ProviderKind::Google => &self.google,
            ProviderKind::Groq => &self.groq,
            ProviderKind::Maritaca => &self.maritaca,
        }
    }

    fn entry_mut(&mut self, kind: ProviderKind) -> &mut ProviderEntry {
        match kind {
            ProviderKind::Google => &mut self.google,
            ProviderKind::Groq => &mut self.groq,
            ProviderKind::Maritaca => &mut self.maritaca,
        }
    }
}

/// One provider's settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Environment variable holding the API key. When absent the provider's
    /// conventional variable is used (e.g. `GOOGLE_API_KEY`).
    pub api_key_env: Option<String>,

    /// Endpoint override for self-hosted or regional deployments.
    pub api_base: Option<String>,

    /// Resolved API key (not serialized).
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ProviderEntry {
    /// Environment variable this entry reads its key from.
    pub fn key_env(&self, kind: ProviderKind) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| kind.api_key_env().to_string())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Concurrency and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum conflict regions resolved in parallel across all files.
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Maximum files processed in parallel.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Retries per region after the initial attempt, for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential retry backoff, in seconds.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Minimum delay after each provider request, in milliseconds. Zero
    /// disables pacing.
    #[serde(default)]
    pub request_interval_ms: u64,

    /// Unchanged lines included around each region when building prompts.
    #[serde(default = "default_prompt_context_lines")]
    pub prompt_context_lines: usize,
}

fn default_max_concurrent_units() -> usize {
    8
}
fn default_max_concurrent_files() -> usize {
    4
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_secs() -> u64 {
    2
}
fn default_prompt_context_lines() -> usize {
    crate::llm::prompt::DEFAULT_CONTEXT_LINES
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            max_concurrent_files: default_max_concurrent_files(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            request_interval_ms: 0,
            prompt_context_lines: default_prompt_context_lines(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// File discovery filters for directory scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Globs a path must match to be scanned. Empty means every file.
    #[serde(default)]
    pub include: Vec<String>,

    /// Globs excluding paths from the scan.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_exclude() -> Vec<String> {
    vec![
        "**/.git/**".into(),
        "**/target/**".into(),
        "**/node_modules/**".into(),
    ]
}
fn default_max_file_bytes() -> u64 {
    1_048_576
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: default_exclude(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path. When absent, logs go to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Conventional configuration path: `~/.config/llmerge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("llmerge").join("config.toml"))
    }

    /// Load from the conventional path when it exists, otherwise fall back
    /// to the built-in defaults. Secrets are resolved either way.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_and_resolve(&path),
            _ => {
                debug!("no configuration file found, using defaults");
                let mut config = Self::default();
                config.resolve_env_vars();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration, resolve secrets from the environment, and
    /// validate in one call.
    pub fn load_and_resolve(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Resolve API keys from the environment variables each provider section
    /// names. A missing variable is logged, not fatal: only the selected
    /// provider's key is required, and the gateway checks for it at call
    /// time.
    pub fn resolve_env_vars(&mut self) {
        for kind in ProviderKind::ALL {
            let env_name = self.providers.entry(kind).key_env(kind);
            let field = format!("providers.{kind}.api_key");
            self.providers.entry_mut(kind).api_key = resolve_optional_env(&env_name, &field);
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm
            .provider
            .parse::<ProviderKind>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "llm.provider".into(),
                detail: e.to_string(),
            })?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".into(),
                detail: format!("must be between 0.0 and 2.0, got {}", self.llm.temperature),
            });
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.max_tokens".into(),
                detail: "must be at least 1".into(),
            });
        }

        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_secs".into(),
                detail: "must be at least 1".into(),
            });
        }

        if self.pipeline.max_concurrent_units == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_concurrent_units".into(),
                detail: "must be at least 1".into(),
            });
        }

        if self.pipeline.max_concurrent_files == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_concurrent_files".into(),
                detail: "must be at least 1".into(),
            });
        }

        if self.scan.max_file_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.max_file_bytes".into(),
                detail: "must be at least 1".into(),
            });
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".into(),
                    detail: format!(
                        "must be one of trace, debug, info, warn, error; got '{other}'"
                    ),
                });
            }
        }

        Ok(())
    }

    /// Selected provider as a typed value. Call [`validate`](Self::validate)
    /// first if the configuration came from user input.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.llm
            .provider
            .parse()
            .map_err(|e: crate::errors::ProviderError| ConfigError::InvalidValue {
                field: "llm.provider".into(),
                detail: e.to_string(),
            })
    }

    /// Assemble everything a gateway needs for the selected provider.
    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let kind = self.provider_kind()?;
        let entry = self.providers.entry(kind);

        Ok(ProviderConfig {
            provider: kind,
            model: self
                .llm
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
            api_key: entry.api_key.clone(),
            api_base: entry.api_base.clone(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            timeout: Duration::from_secs(self.llm.timeout_secs),
        })
    }
}

/// Resolve an environment variable, logging instead of failing when unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(value) if !value.is_empty() => {
            debug!(field, env = env_name, "resolved secret from environment");
            Some(value)
        }
        _ => {
            warn!(
                field,
                env = env_name,
                "environment variable not set, provider calls may fail"
            );
            None
        }
    }
}

/// Annotated configuration template written by `llmerge init`.
pub fn default_template() -> &'static str {
    r#"# llmerge configuration.
#
# API keys are never stored in this file. Each provider reads its key from
# the environment variable named under [providers.<name>].

[llm]
# Provider to use: google, groq, or maritaca.
provider = "google"
# Model identifier. Omit to use the provider's default.
# model = "gemini-2.0-flash"
temperature = 0.3
max_tokens = 4096
timeout_secs = 60

[providers.google]
api_key_env = "GOOGLE_API_KEY"

[providers.groq]
api_key_env = "GROQ_API_KEY"

[providers.maritaca]
api_key_env = "MARITACA_API_KEY"
# api_base = "https://api.maritaca.ai/api/v1/chat"

[pipeline]
max_concurrent_units = 8
max_concurrent_files = 4
max_retries = 2
retry_backoff_secs = 2
request_interval_ms = 0
prompt_context_lines = 8

[scan]
# Globs are matched against paths relative to the scan root.
# include = ["src/**/*.rs"]
exclude = ["**/.git/**", "**/target/**", "**/node_modules/**"]
max_file_bytes = 1048576

[logging]
level = "info"
# file = "llmerge.log"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[llm]
provider = "groq"
model = "llama-3.3-70b-versatile"
temperature = 0.5
max_tokens = 2048
timeout_secs = 30

[providers.groq]
api_key_env = "TEST_GROQ_KEY"

[pipeline]
max_concurrent_units = 4
max_concurrent_files = 2
max_retries = 1
retry_backoff_secs = 1
request_interval_ms = 250

[scan]
include = ["**/*.rs"]
exclude = ["**/target/**"]
max_file_bytes = 65536

[logging]
level = "debug"
file = "/tmp/llmerge-test.log"
"#
    }

    #[test]
    fn test_parse_sample_config() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.llm.provider, "groq");
        assert_eq!(config.llm.model.as_deref(), Some("llama-3.3-70b-versatile"));
        assert_eq!(config.llm.temperature, 0.5);
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(
            config.providers.groq.api_key_env.as_deref(),
            Some("TEST_GROQ_KEY")
        );
        assert_eq!(config.pipeline.max_concurrent_units, 4);
        assert_eq!(config.pipeline.request_interval_ms, 250);
        assert_eq!(config.scan.include, vec!["**/*.rs".to_string()]);
        assert_eq!(config.scan.max_file_bytes, 65536);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_some());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.llm.temperature, 0.3);
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.pipeline.max_concurrent_units, 8);
        assert_eq!(config.pipeline.max_concurrent_files, 4);
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(config.pipeline.retry_backoff_secs, 2);
        assert_eq!(config.pipeline.request_interval_ms, 0);
        assert_eq!(config.pipeline.prompt_context_lines, 8);
        assert!(config.scan.include.is_empty());
        assert!(config.scan.exclude.iter().any(|g| g.contains(".git")));
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.llm.provider, "groq");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load_from_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [ valid toml").unwrap();

        let err = AppConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = AppConfig::default();
        config.llm.provider = "openai".into();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "llm.provider"));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = AppConfig::default();
        config.llm.provider = "google".into();
        config.llm.temperature = 3.5;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "llm.temperature"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.llm.provider = "google".into();
        config.pipeline.max_concurrent_units = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "pipeline.max_concurrent_units"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.llm.provider = "google".into();
        config.logging.level = "loud".into();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "logging.level"));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("LLMERGE_TEST_RESOLVE_KEY", "sk-test-123");

        let mut config = AppConfig::default();
        config.providers.google.api_key_env = Some("LLMERGE_TEST_RESOLVE_KEY".into());
        config.resolve_env_vars();

        assert_eq!(config.providers.google.api_key.as_deref(), Some("sk-test-123"));

        std::env::remove_var("LLMERGE_TEST_RESOLVE_KEY");
    }

    #[test]
    fn test_key_env_falls_back_to_convention() {
        let entry = ProviderEntry::default();
        assert_eq!(entry.key_env(ProviderKind::Maritaca), "MARITACA_API_KEY");

        let named = ProviderEntry {
            api_key_env: Some("MY_KEY".into()),
            ..Default::default()
        };
        assert_eq!(named.key_env(ProviderKind::Maritaca), "MY_KEY");
    }

    #[test]
    fn test_provider_config_falls_back_to_default_model() {
        let mut config = AppConfig::default();
        config.llm.provider = "maritaca".into();
        config.llm.model = None;

        let provider = config.provider_config().unwrap();
        assert_eq!(provider.provider, ProviderKind::Maritaca);
        assert_eq!(provider.model, "sabia-3");
        assert_eq!(provider.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_default_template_parses_and_validates() {
        let config: AppConfig = toml::from_str(default_template()).unwrap();
        assert_eq!(config.llm.provider, "google");
        config.validate().unwrap();
    }
}
