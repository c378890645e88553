//! Splices resolved text back over conflict spans.
//!
//! Replacements are applied in descending span order so earlier offsets stay
//! valid while later regions are rewritten. Every byte outside a replaced
//! span is carried through untouched.

use tracing::debug;

use crate::errors::PatchError;
use crate::models::{ConflictUnit, ResolvedRegion};

/// Apply every successful resolution in `units` to `text`.
///
/// Failed units are skipped, leaving their markers in place. Spans are
/// validated (in bounds, on char boundaries, non-overlapping) before any
/// splicing happens, so an error means `text` was never going to be
/// partially rewritten.
pub fn apply_resolutions(
    text: &str,
    units: &[(ConflictUnit, ResolvedRegion)],
) -> Result<String, PatchError> {
    let mut resolved: Vec<(&ConflictUnit, &str)> = units
        .iter()
        .filter_map(|(unit, region)| region.text().map(|t| (unit, t)))
        .collect();

    if resolved.is_empty() {
        return Ok(text.to_string());
    }

    for (unit, _) in &resolved {
        let in_bounds = unit.span_start <= unit.span_end
            && unit.span_end <= text.len()
            && text.is_char_boundary(unit.span_start)
            && text.is_char_boundary(unit.span_end);
        if !in_bounds {
            return Err(PatchError::SpanOutOfBounds {
                span_start: unit.span_start,
                span_end: unit.span_end,
                text_len: text.len(),
            });
        }
    }

    resolved.sort_by_key(|(unit, _)| unit.span_start);
    for pair in resolved.windows(2) {
        let (first, _) = pair[0];
        let (second, _) = pair[1];
        if first.span_end > second.span_start {
            return Err(PatchError::OverlappingSpans {
                first_start: first.span_start,
                first_end: first.span_end,
                second_start: second.span_start,
                second_end: second.span_end,
            });
        }
    }

    let mut out = text.to_string();
    for (unit, replacement) in resolved.iter().rev() {
        let replacement = with_region_terminator(text, unit, replacement);
        out.replace_range(unit.span_start..unit.span_end, &replacement);
    }

    debug!(replaced = resolved.len(), "applied resolutions");
    Ok(out)
}

/// Replacement text with the region's trailing line terminator restored when
/// the reply dropped it. Matches the region's own terminator, so CRLF files
/// stay CRLF.
fn with_region_terminator(text: &str, unit: &ConflictUnit, replacement: &str) -> String {
    let region = &text[unit.span_start..unit.span_end];
    if region.ends_with('\n') && !replacement.ends_with('\n') {
        let terminator = if region.ends_with("\r\n") { "\r\n" } else { "\n" };
        let mut patched = String::with_capacity(replacement.len() + terminator.len());
        patched.push_str(replacement);
        patched.push_str(terminator);
        patched
    } else {
        replacement.to_string()
    }
}
