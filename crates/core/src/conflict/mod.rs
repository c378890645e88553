//! Conflict extraction and patching.
//!
//! The conflict subsystem is responsible for:
//! 1. **Extraction** -- lifting `<<<<<<<` / `=======` / `>>>>>>>` regions out
//!    of file text with exact byte spans.
//! 2. **Patching** -- splicing validated replacement text back over those
//!    spans, leaving every untouched byte alone.

pub mod extractor;
pub mod patcher;

pub use extractor::{has_conflict_markers, scan_conflicts, ConflictScanner};
pub use patcher::apply_resolutions;
