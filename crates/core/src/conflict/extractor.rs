//! Conflict region extraction.
//!
//! The scanner walks file text line by line and lifts out each conflicted
//! region as a [`ConflictUnit`] carrying exact byte spans, so that resolved
//! text can later be spliced back without disturbing anything else.
//!
//! A marker line is exactly seven marker characters at column zero, followed
//! by a space or the end of the line. Anything else, including indented or
//! longer runs, is ordinary content. Separator and end markers appearing
//! outside an open region are content too; only `<<<<<<<` opens one.

use tracing::debug;

use crate::errors::MalformedConflict;
use crate::models::ConflictUnit;

// ---------------------------------------------------------------------------
// Line walking
// ---------------------------------------------------------------------------

/// One physical line with its byte span in the enclosing text.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    /// Byte offset of the first character.
    start: usize,
    /// Byte offset one past the terminator (or the text end).
    end: usize,
    /// One-based line number.
    number: usize,
    /// Raw slice, terminator included.
    raw: &'a str,
}

impl<'a> Line<'a> {
    /// Line content without its terminator, `\r\n` handled.
    fn content(&self) -> &'a str {
        let s = self.raw.strip_suffix('\n').unwrap_or(self.raw);
        s.strip_suffix('\r').unwrap_or(s)
    }
}

/// Iterator over [`Line`]s, tracking byte offsets.
struct Lines<'a> {
    text: &'a str,
    offset: usize,
    number: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            number: 0,
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        if self.offset >= self.text.len() {
            return None;
        }
        let start = self.offset;
        let end = match self.text[start..].find('\n') {
            Some(pos) => start + pos + 1,
            None => self.text.len(),
        };
        self.offset = end;
        self.number += 1;
        Some(Line {
            start,
            end,
            number: self.number,
            raw: &self.text[start..end],
        })
    }
}

// ---------------------------------------------------------------------------
// Marker classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Marker<'a> {
    /// `<<<<<<< label`
    Start(&'a str),
    /// `||||||| label` (label discarded)
    Base,
    /// `=======`
    Separator,
    /// `>>>>>>> label`
    End(&'a str),
}

impl Marker<'_> {
    fn glyph(&self) -> &'static str {
        match self {
            Self::Start(_) => "<<<<<<<",
            Self::Base => "|||||||",
            Self::Separator => "=======",
            Self::End(_) => ">>>>>>>",
        }
    }
}

/// Label after a run of exactly seven `marker` bytes, or `None` when the
/// line is not that marker.
fn marker_label(content: &str, marker: u8) -> Option<&str> {
    let bytes = content.as_bytes();
    if bytes.len() < 7 || bytes[..7].iter().any(|&b| b != marker) {
        return None;
    }
    match bytes.get(7) {
        None => Some(""),
        Some(b' ') => Some(&content[8..]),
        Some(_) => None,
    }
}

fn classify(content: &str) -> Option<Marker<'_>> {
    if let Some(label) = marker_label(content, b'<') {
        return Some(Marker::Start(label));
    }
    if let Some(label) = marker_label(content, b'>') {
        return Some(Marker::End(label));
    }
    if marker_label(content, b'|').is_some() {
        return Some(Marker::Base);
    }
    if content.trim_end() == "=======" {
        return Some(Marker::Separator);
    }
    None
}

/// Whether any line in `text` opens a conflict region.
pub fn has_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        let content = line.strip_suffix('\r').unwrap_or(line);
        marker_label(content, b'<').is_some()
    })
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Byte spans already known for the sides parsed so far within one region.
enum RegionState {
    /// Between `<<<<<<<` and the next structural marker.
    Ours { from: usize },
    /// Between `|||||||` and `=======`.
    Base { ours: (usize, usize), from: usize },
    /// Between `=======` and `>>>>>>>`.
    Theirs {
        ours: (usize, usize),
        base: Option<(usize, usize)>,
        from: usize,
    },
}

/// Lazy iterator over the conflict regions of one file's text.
///
/// Yields regions in document order. The first malformed region yields an
/// `Err` and ends the iteration; callers that want all-or-nothing semantics
/// can simply `collect` into a `Result`.
pub struct ConflictScanner<'a> {
    text: &'a str,
    file_path: &'a str,
    lines: Lines<'a>,
    next_index: usize,
    failed: bool,
}

impl<'a> ConflictScanner<'a> {
    pub fn new(file_path: &'a str, text: &'a str) -> Self {
        Self {
            text,
            file_path,
            lines: Lines::new(text),
            next_index: 0,
            failed: false,
        }
    }

    /// Parse one region, starting just after its `<<<<<<<` line.
    fn parse_region(
        &mut self,
        start: Line<'a>,
        ours_label: &'a str,
    ) -> Result<ConflictUnit, MalformedConflict> {
        let mut state = RegionState::Ours { from: start.end };

        loop {
            let Some(line) = self.lines.next() else {
                return Err(MalformedConflict::MissingEnd {
                    start_line: start.number,
                });
            };

            let Some(marker) = classify(line.content()) else {
                continue;
            };

            match (marker, state) {
                (Marker::Start(_), _) => {
                    return Err(MalformedConflict::NestedStart {
                        line: line.number,
                        open_line: start.number,
                    });
                }
                (Marker::Base, RegionState::Ours { from }) => {
                    state = RegionState::Base {
                        ours: (from, line.start),
                        from: line.end,
                    };
                }
                (Marker::Separator, RegionState::Ours { from }) => {
                    state = RegionState::Theirs {
                        ours: (from, line.start),
                        base: None,
                        from: line.end,
                    };
                }
                (Marker::Separator, RegionState::Base { ours, from }) => {
                    state = RegionState::Theirs {
                        ours,
                        base: Some((from, line.start)),
                        from: line.end,
                    };
                }
                (Marker::End(label), RegionState::Theirs { ours, base, from }) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    return Ok(ConflictUnit {
                        file_path: self.file_path.to_string(),
                        index,
                        span_start: start.start,
                        span_end: line.end,
                        start_line: start.number,
                        end_line: line.number,
                        ours_label: ours_label.to_string(),
                        theirs_label: label.to_string(),
                        ours: self.text[ours.0..ours.1].to_string(),
                        theirs: self.text[from..line.start].to_string(),
                        base: base.map(|(a, b)| self.text[a..b].to_string()),
                    });
                }
                (Marker::End(_), RegionState::Ours { .. } | RegionState::Base { .. }) => {
                    return Err(MalformedConflict::MissingSeparator {
                        start_line: start.number,
                        line: line.number,
                    });
                }
                (marker, _) => {
                    return Err(MalformedConflict::MarkerOutOfOrder {
                        line: line.number,
                        marker: marker.glyph().to_string(),
                    });
                }
            }
        }
    }
}

impl<'a> Iterator for ConflictScanner<'a> {
    type Item = Result<ConflictUnit, MalformedConflict>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            if let Some(Marker::Start(label)) = classify(line.content()) {
                match self.parse_region(line, label) {
                    Ok(unit) => return Some(Ok(unit)),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Extract every conflict region from `text`, or the first structural error.
pub fn scan_conflicts(
    file_path: &str,
    text: &str,
) -> Result<Vec<ConflictUnit>, MalformedConflict> {
    let units: Vec<ConflictUnit> = ConflictScanner::new(file_path, text).collect::<Result<_, _>>()?;
    debug!(file = file_path, count = units.len(), "scanned conflict regions");
    Ok(units)
}
