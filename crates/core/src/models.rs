//! Domain model types used throughout llmerge.
//!
//! These types flow between the scanner, prompt builder, provider gateways,
//! patcher, and the CLI's run report.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

// ---------------------------------------------------------------------------
// Conflict unit
// ---------------------------------------------------------------------------

/// One conflicted region lifted out of a file.
///
/// Byte offsets address the enclosing file text: `span_start` is the first
/// byte of the `<<<<<<<` marker line and `span_end` is one past the last
/// byte of the `>>>>>>>` marker line, including its line terminator when
/// present. Side texts are the raw bytes of the side's lines, terminators
/// included, so CRLF files survive a round trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictUnit {
    /// Path of the file the region came from, as given to the scanner.
    pub file_path: String,

    /// Zero-based position of this region among the file's conflicts.
    pub index: usize,

    /// Byte offset of the start marker line.
    pub span_start: usize,

    /// Byte offset one past the end marker line.
    pub span_end: usize,

    /// One-based line number of the start marker.
    pub start_line: usize,

    /// One-based line number of the end marker.
    pub end_line: usize,

    /// Branch label after the start marker (e.g. `HEAD`).
    pub ours_label: String,

    /// Branch label after the end marker.
    pub theirs_label: String,

    /// Content of the side that was checked out.
    pub ours: String,

    /// Content of the side being merged in.
    pub theirs: String,

    /// Common-ancestor content when the file carries diff3 markers.
    pub base: Option<String>,
}

impl ConflictUnit {
    /// Number of lines the region occupies, markers included.
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

// ---------------------------------------------------------------------------
// Prompt payload
// ---------------------------------------------------------------------------

/// A rendered prompt ready to send to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptPayload {
    /// Instruction text sent as the system message.
    pub system: String,

    /// The conflict presentation sent as the user message.
    pub user: String,
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Groq,
    Maritaca,
}

impl ProviderKind {
    /// All known providers, in display order.
    pub const ALL: [ProviderKind; 3] = [Self::Google, Self::Groq, Self::Maritaca];

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Groq => "groq",
            Self::Maritaca => "maritaca",
        }
    }

    /// Environment variable conventionally holding the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::Maritaca => "MARITACA_API_KEY",
        }
    }

    /// Model used when the configuration names none.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Google => "gemini-2.0-flash",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Maritaca => "sabia-3",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            "maritaca" => Ok(Self::Maritaca),
            other => Err(ProviderError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Everything a gateway needs to issue one request.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderKind,

    /// Model identifier passed to the provider.
    pub model: String,

    /// API key, when one was resolved from the environment.
    pub api_key: Option<String>,

    /// Endpoint override for self-hosted or regional deployments.
    pub api_base: Option<String>,

    /// Sampling temperature.
    pub temperature: f32,

    /// Upper bound on generated tokens per reply.
    pub max_tokens: u32,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Google,
            model: ProviderKind::Google.default_model().to_string(),
            api_key: None,
            api_base: None,
            temperature: 0.3,
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider replies
// ---------------------------------------------------------------------------

/// Raw text reply from a provider, before interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Reply text exactly as the provider returned it.
    pub text: String,

    /// Provider that produced the reply.
    pub provider: String,

    /// Model that produced the reply.
    pub model: String,

    /// End-to-end request latency.
    pub latency: Duration,
}

// ---------------------------------------------------------------------------
// Resolutions
// ---------------------------------------------------------------------------

/// Outcome of resolving a single [`ConflictUnit`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ResolvedRegion {
    /// Validated replacement text for the whole region.
    Resolved { text: String, latency_ms: u64 },

    /// The unit could not be resolved; the reason is rendered for reporting.
    Failed { reason: String },
}

impl ResolvedRegion {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// Replacement text, when resolution succeeded.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Resolved { text, .. } => Some(text),
            Self::Failed { .. } => None,
        }
    }

    /// Failure reason, when resolution did not succeed.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Resolved { .. } => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// Aggregate status of one file after a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FileStatus {
    /// Every conflict in the file was replaced.
    FullyResolved,

    /// Some conflicts were replaced; the listed unit indexes were not.
    PartiallyResolved { failed_units: Vec<usize> },

    /// Nothing was applied (malformed markers or a file-level failure).
    Failed { error: String },
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullyResolved => write!(f, "resolved"),
            Self::PartiallyResolved { failed_units } => {
                write!(f, "partial ({} unresolved)", failed_units.len())
            }
            Self::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Everything produced for one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub file_path: String,

    /// Input text exactly as read.
    pub original_text: String,

    /// Output text with resolved regions spliced in. Equals the input when
    /// nothing was resolved.
    pub patched_text: String,

    /// Per-unit outcomes in document order.
    pub units: Vec<(ConflictUnit, ResolvedRegion)>,

    pub status: FileStatus,
}

impl ResolutionResult {
    /// Result for a file that failed before any unit-level work ran.
    pub fn failed(
        file_path: impl Into<String>,
        original_text: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        let original_text = original_text.into();
        Self {
            file_path: file_path.into(),
            patched_text: original_text.clone(),
            original_text,
            units: Vec::new(),
            status: FileStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn resolved_count(&self) -> usize {
        self.units.iter().filter(|(_, r)| r.is_resolved()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.units.len() - self.resolved_count()
    }

    /// Whether the output differs from the input.
    pub fn is_modified(&self) -> bool {
        self.patched_text != self.original_text
    }
}
