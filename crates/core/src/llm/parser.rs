//! Reply interpretation.
//!
//! The system prompt asks for a bare code snippet, but models routinely wrap
//! replies in markdown fences or pad them with prose anyway. The parser
//! extracts the intended replacement heuristically and fails safe: when a
//! reply cannot be pinned to one candidate, the unit is marked failed rather
//! than guessed at.

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::trace;

use crate::conflict::has_conflict_markers;
use crate::errors::UnresolvableResponse;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid fence pattern"))
}

/// Extract the replacement code from raw model output.
///
/// Rules, in order:
/// 1. One fenced block: its contents are the candidate.
/// 2. Several fenced blocks with identical contents: that content.
/// 3. Several differing blocks: [`UnresolvableResponse::AmbiguousBlocks`].
/// 4. No closed fence: the whole reply, trimmed, is the candidate; an
///    unterminated opening fence line is dropped first.
///
/// The candidate keeps its inner indentation; only surrounding blank lines
/// and trailing whitespace are stripped. An empty candidate or one that
/// still carries conflict markers is rejected.
pub fn parse_resolution(reply: &str) -> Result<String, UnresolvableResponse> {
    let blocks: Vec<&str> = fence_regex()
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| trim_block(m.as_str()))
        .collect();

    let candidate = match blocks.as_slice() {
        [] => trim_block(strip_unterminated_fence(reply)),
        [single] => *single,
        [first, rest @ ..] => {
            if rest.iter().all(|b| b == first) {
                *first
            } else {
                return Err(UnresolvableResponse::AmbiguousBlocks(blocks.len()));
            }
        }
    };

    if candidate.is_empty() {
        return Err(UnresolvableResponse::Empty);
    }
    if has_conflict_markers(candidate) {
        return Err(UnresolvableResponse::ContainsMarkers);
    }

    trace!(bytes = candidate.len(), fenced = !blocks.is_empty(), "parsed reply");
    Ok(candidate.to_string())
}

/// Strip surrounding blank lines and trailing whitespace, keeping the first
/// line's indentation intact.
fn trim_block(block: &str) -> &str {
    block.trim_start_matches(['\r', '\n']).trim_end()
}

/// A reply that opens a fence and never closes it still means the fence
/// interior: everything after the opening line.
fn strip_unterminated_fence(reply: &str) -> &str {
    let trimmed = reply.trim_start();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply;
    };
    match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_reply_is_used_whole() {
        let out = parse_resolution("let merged = a + b;\n").unwrap();
        assert_eq!(out, "let merged = a + b;");
    }

    #[test]
    fn test_fenced_reply() {
        let out = parse_resolution("```rust\nlet merged = a + b;\n```\n").unwrap();
        assert_eq!(out, "let merged = a + b;");
    }

    #[test]
    fn test_fence_with_surrounding_prose() {
        let reply = "Here is the resolution:\n```\nfoo();\nbar();\n```\nHope that helps!";
        let out = parse_resolution(reply).unwrap();
        assert_eq!(out, "foo();\nbar();");
    }

    #[test]
    fn test_indentation_of_first_line_preserved() {
        let out = parse_resolution("```\n    indented();\n```").unwrap();
        assert_eq!(out, "    indented();");

        let bare = parse_resolution("    indented();\n").unwrap();
        assert_eq!(bare, "    indented();");
    }

    #[test]
    fn test_identical_blocks_are_accepted() {
        let reply = "```\nx();\n```\nrepeated for clarity:\n```\nx();\n```";
        assert_eq!(parse_resolution(reply).unwrap(), "x();");
    }

    #[test]
    fn test_differing_blocks_are_ambiguous() {
        let reply = "Either\n```\nx();\n```\nor\n```\ny();\n```";
        let err = parse_resolution(reply).unwrap_err();
        assert_eq!(err, UnresolvableResponse::AmbiguousBlocks(2));
    }

    #[test]
    fn test_empty_reply_rejected() {
        assert_eq!(parse_resolution("").unwrap_err(), UnresolvableResponse::Empty);
        assert_eq!(
            parse_resolution("   \n\n  ").unwrap_err(),
            UnresolvableResponse::Empty
        );
        assert_eq!(
            parse_resolution("```\n\n```").unwrap_err(),
            UnresolvableResponse::Empty
        );
    }

    #[test]
    fn test_reply_with_conflict_markers_rejected() {
        let reply = "<<<<<<< HEAD\nstill conflicted\n=======\nnope\n>>>>>>> topic";
        assert_eq!(
            parse_resolution(reply).unwrap_err(),
            UnresolvableResponse::ContainsMarkers
        );
    }

    #[test]
    fn test_crlf_fences() {
        let out = parse_resolution("```rust\r\nmerged();\r\n```\r\n").unwrap();
        assert_eq!(out, "merged();");
    }

    #[test]
    fn test_unterminated_fence_takes_rest_of_reply() {
        let out = parse_resolution("```rust\nlet merged = a + b;\nfinish();\n").unwrap();
        assert_eq!(out, "let merged = a + b;\nfinish();");

        assert_eq!(
            parse_resolution("```").unwrap_err(),
            UnresolvableResponse::Empty
        );
    }

    #[test]
    fn test_multiline_snippet_keeps_inner_blank_lines() {
        let reply = "```\nfn a() {}\n\nfn b() {}\n```";
        assert_eq!(parse_resolution(reply).unwrap(), "fn a() {}\n\nfn b() {}");
    }
}
