//! llmerge core library.
//!
//! This crate provides the building blocks for LLM-assisted merge conflict
//! resolution: conflict extraction and patching, prompt construction,
//! provider gateways, and the pipeline that orchestrates them per file.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod llm;
pub mod models;
pub mod pipeline;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{apply_resolutions, has_conflict_markers, scan_conflicts, ConflictScanner};
pub use errors::CoreError;
pub use llm::{create_gateway, parse_resolution, LlmGateway, PromptBuilder};
pub use models::{
    ConflictUnit, FileStatus, PromptPayload, ProviderConfig, ProviderKind, RawResponse,
    ResolutionResult, ResolvedRegion,
};
pub use pipeline::{CancelToken, Pipeline, PipelineOptions};
