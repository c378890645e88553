//! Error types for the llmerge core library.
//!
//! Each pipeline stage has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Conflict(#[from] MalformedConflict),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Response(#[from] UnresolvableResponse),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Conflict marker errors
// ---------------------------------------------------------------------------

/// Violations of the conflict marker grammar.
///
/// Line numbers are one-based and refer to the scanned text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedConflict {
    /// A start marker appeared while a previous region was still open.
    #[error("nested conflict start at line {line} (region opened at line {open_line})")]
    NestedStart { line: usize, open_line: usize },

    /// The text ended before the open region was closed.
    #[error("conflict starting at line {start_line} has no closing '>>>>>>>' marker")]
    MissingEnd { start_line: usize },

    /// An end marker appeared before the '=======' separator.
    #[error("conflict starting at line {start_line} ends at line {line} without a '=======' separator")]
    MissingSeparator { start_line: usize, line: usize },

    /// A marker appeared in a position the grammar does not allow.
    #[error("unexpected '{marker}' marker at line {line}")]
    MarkerOutOfOrder { line: usize, marker: String },
}

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Errors from LLM provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request exceeded the configured timeout.
    #[error("{provider} request timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Network / TLS / connection failure below the HTTP layer.
    #[error("{provider} transport error: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API rejected our credentials.
    #[error("{provider} authentication failed (HTTP {status})")]
    AuthenticationFailed { provider: String, status: u16 },

    /// Rate limit exceeded.
    #[error("{provider} rate limit exceeded{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The API returned a non-success status code.
    #[error("{provider} API error (HTTP {status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// No API key was available for the provider.
    #[error("no API key found for {provider}: set the {env_var} environment variable")]
    MissingCredentials { provider: String, env_var: String },

    /// The reply arrived but did not contain the expected fields.
    #[error("{provider} returned a malformed reply: {detail}")]
    MalformedReply { provider: String, detail: String },

    /// The configured provider name is not recognized.
    #[error("unsupported provider '{0}' (expected google, groq, or maritaca)")]
    UnsupportedProvider(String),
}

impl ProviderError {
    /// Whether another attempt might succeed.
    ///
    /// Timeouts, transport failures, rate limits, and 5xx responses are
    /// transient; everything else is deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Reply interpretation errors
// ---------------------------------------------------------------------------

/// Errors from interpreting a provider reply as replacement code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnresolvableResponse {
    /// The reply was empty or whitespace-only after trimming.
    #[error("reply contains no replacement code")]
    Empty,

    /// The reply contained multiple code blocks with differing contents.
    #[error("reply contains {0} code blocks with differing contents")]
    AmbiguousBlocks(usize),

    /// The reply still contains conflict markers instead of resolved code.
    #[error("reply still contains conflict markers")]
    ContainsMarkers,
}

// ---------------------------------------------------------------------------
// Patch errors
// ---------------------------------------------------------------------------

/// Errors from splicing resolutions back into the original text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A resolution's byte span does not lie within the original text.
    #[error("resolution span {span_start}..{span_end} is outside the text (len {text_len})")]
    SpanOutOfBounds {
        span_start: usize,
        span_end: usize,
        text_len: usize,
    },

    /// Two resolution spans overlap.
    #[error("resolution spans {first_start}..{first_end} and {second_start}..{second_end} overlap")]
    OverlappingSpans {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
