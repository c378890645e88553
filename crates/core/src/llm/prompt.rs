//! Prompt construction.
//!
//! Rendering is a pure function of the conflict unit, the file text, and the
//! context window: identical inputs always produce byte-identical payloads,
//! so runs are reproducible for a fixed model and seed.

use crate::models::{ConflictUnit, PromptPayload};

/// Surrounding unchanged lines included on each side of the region.
pub const DEFAULT_CONTEXT_LINES: usize = 8;

/// Instruction text sent as the system message with every request.
pub(crate) const SYSTEM_PROMPT: &str = r#"# Merge Conflict Resolution Assistant

You are an expert software engineer resolving merge conflicts with precision and accuracy.

## Input
Each request presents one conflicted region from a file under merge:
- the current version (the branch being merged into)
- the incoming version (the branch being merged in)
- the common-ancestor version, when the repository recorded one
- a few unchanged lines of surrounding context
- the merge commit message, when one was supplied

## Resolution Approach
1. Analyze how the current and incoming versions each diverged from the ancestor.
2. Identify the intent of both changes: what was added, modified, removed, or renamed.
3. Consider the commit message for additional context about the purpose of the merge.
4. Preserve the functionality of both sides whenever they are compatible.
5. For incompatible changes, prefer the change that aligns with the commit message intent and the surrounding context.
6. For renamed identifiers, follow the convention the surrounding code already uses.

## Common Pitfalls to Avoid
1. Syntactic errors: no unbalanced brackets, quotes, or missing statement terminators.
2. Logical inconsistencies: do not combine contradictory logic from both versions.
3. Indentation: match the indentation of the surrounding code exactly.
4. Over-resolution: do not refactor or fix anything beyond the conflict itself.
5. Truncation: never drop code that should remain in the resolution.
6. Duplication: never repeat statements that must appear only once.
7. Whitespace: preserve the whitespace style of the surrounding lines.

## Edge Cases
1. One side deleted what the other modified: judge from context which intent should win.
2. Whitespace-only or formatting-only differences: follow the surrounding style.
3. Comment-only differences: keep the most informative, up-to-date comment.
4. Import conflicts: combine both sides without duplicates.
5. Signature changes: keep the resolution compatible with its callers in the context.

## Output Format
Reply with ONLY the resolved code that replaces the conflicted region. No explanations, no conflict markers, and no markdown fences. The reply must be ready to drop into the file verbatim.
"#;

/// Renders one [`ConflictUnit`] into a [`PromptPayload`].
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    context_lines: usize,
    commit_message: Option<String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LINES)
    }
}

impl PromptBuilder {
    pub fn new(context_lines: usize) -> Self {
        Self {
            context_lines,
            commit_message: None,
        }
    }

    /// Attach the merge commit message; it is included in every payload
    /// this builder produces.
    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    /// Build the payload for one region. `file_text` must be the text the
    /// unit was scanned from; out-of-range spans degrade to empty context
    /// rather than panicking.
    pub fn build(&self, unit: &ConflictUnit, file_text: &str) -> PromptPayload {
        let before = tail_lines(
            file_text.get(..unit.span_start).unwrap_or(""),
            self.context_lines,
        );
        let after = head_lines(
            file_text.get(unit.span_end..).unwrap_or(""),
            self.context_lines,
        );

        let ours_label = label_or(&unit.ours_label, "ours");
        let theirs_label = label_or(&unit.theirs_label, "theirs");

        let mut user = String::new();
        user.push_str("File: ");
        user.push_str(&unit.file_path);
        user.push_str("\n\n");

        if !before.is_empty() {
            push_block(&mut user, "Context before the conflict", &before);
        }
        push_block(
            &mut user,
            &format!("Current version ({ours_label})"),
            &unit.ours,
        );
        if let Some(base) = &unit.base {
            push_block(&mut user, "Common ancestor version", base);
        }
        push_block(
            &mut user,
            &format!("Incoming version ({theirs_label})"),
            &unit.theirs,
        );
        if !after.is_empty() {
            push_block(&mut user, "Context after the conflict", &after);
        }
        if let Some(message) = &self.commit_message {
            push_block(&mut user, "Commit message", message);
        }

        user.push_str(
            "Resolve the conflict between the current and incoming versions. \
             Reply with only the replacement for the conflicted region.",
        );

        PromptPayload {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

fn label_or<'a>(label: &'a str, fallback: &'a str) -> &'a str {
    if label.is_empty() {
        fallback
    } else {
        label
    }
}

fn push_block(user: &mut String, heading: &str, body: &str) {
    let body = body.strip_suffix('\n').unwrap_or(body);
    let body = body.strip_suffix('\r').unwrap_or(body);
    user.push_str("### ");
    user.push_str(heading);
    user.push_str("\n```\n");
    user.push_str(body);
    user.push_str("\n```\n\n");
}

/// Last `n` lines of `text`, newline-joined.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// First `n` lines of `text`, newline-joined.
fn head_lines(text: &str, n: usize) -> String {
    text.lines().take(n).collect::<Vec<&str>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::scan_conflicts;

    fn unit_from(text: &str) -> (ConflictUnit, String) {
        let unit = scan_conflicts("src/lib.rs", text).unwrap().remove(0);
        (unit, text.to_string())
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let (unit, text) =
            unit_from("a\n<<<<<<< HEAD\none\n=======\nuno\n>>>>>>> topic\nb\n");
        let builder = PromptBuilder::default();

        let first = builder.build(&unit, &text);
        let second = builder.build(&unit, &text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_prompt_carries_both_sides_and_labels() {
        let (unit, text) =
            unit_from("a\n<<<<<<< HEAD\none\n=======\nuno\n>>>>>>> topic\nb\n");
        let payload = PromptBuilder::default().build(&unit, &text);

        assert!(payload.user.contains("File: src/lib.rs"));
        assert!(payload.user.contains("Current version (HEAD)"));
        assert!(payload.user.contains("Incoming version (topic)"));
        assert!(payload.user.contains("\none\n"));
        assert!(payload.user.contains("\nuno\n"));
        assert!(!payload.user.contains("Common ancestor"));
        assert!(payload.system.contains("ONLY the resolved code"));
    }

    #[test]
    fn test_prompt_includes_ancestor_when_present() {
        let (unit, text) = unit_from(
            "<<<<<<< HEAD\none\n||||||| base\nzero\n=======\nuno\n>>>>>>> topic\n",
        );
        let payload = PromptBuilder::default().build(&unit, &text);

        assert!(payload.user.contains("Common ancestor version"));
        assert!(payload.user.contains("\nzero\n"));
    }

    #[test]
    fn test_context_window_is_bounded() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("before{i}\n"));
        }
        text.push_str("<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\n");
        for i in 0..20 {
            text.push_str(&format!("after{i}\n"));
        }

        let unit = scan_conflicts("f.txt", &text).unwrap().remove(0);
        let payload = PromptBuilder::new(3).build(&unit, &text);

        assert!(payload.user.contains("before19"));
        assert!(payload.user.contains("before17"));
        assert!(!payload.user.contains("before16"));
        assert!(payload.user.contains("after0"));
        assert!(payload.user.contains("after2"));
        assert!(!payload.user.contains("after3"));
    }

    #[test]
    fn test_context_sections_omitted_at_file_edges() {
        let (unit, text) = unit_from("<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\n");
        let payload = PromptBuilder::default().build(&unit, &text);

        assert!(!payload.user.contains("Context before"));
        assert!(!payload.user.contains("Context after"));
    }

    #[test]
    fn test_zero_context_lines() {
        let (unit, text) =
            unit_from("a\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\nb\n");
        let payload = PromptBuilder::new(0).build(&unit, &text);

        assert!(!payload.user.contains("Context before"));
        assert!(!payload.user.contains("Context after"));
    }

    #[test]
    fn test_missing_labels_fall_back() {
        let (unit, text) = unit_from("<<<<<<<\nx\n=======\ny\n>>>>>>>\n");
        let payload = PromptBuilder::default().build(&unit, &text);

        assert!(payload.user.contains("Current version (ours)"));
        assert!(payload.user.contains("Incoming version (theirs)"));
    }

    #[test]
    fn test_commit_message_included_when_supplied() {
        let (unit, text) =
            unit_from("a\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> t\nb\n");

        let without = PromptBuilder::default().build(&unit, &text);
        assert!(!without.user.contains("Commit message"));

        let with = PromptBuilder::default()
            .with_commit_message("Merge branch 'topic': rename widget ids")
            .build(&unit, &text);
        assert!(with.user.contains("### Commit message"));
        assert!(with.user.contains("rename widget ids"));
    }
}
