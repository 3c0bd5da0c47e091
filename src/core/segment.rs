//! Splits raw assistant output into renderable segments.
//!
//! The scanner has exactly two states: outside a fence, accumulating text
//! lines, and inside a fence, accumulating code lines. A fence opens on a
//! line of three backticks followed immediately by an optional language tag
//! (no whitespace in between) and closes on a line of three backticks. A
//! fence left open at the end of input is restored verbatim as text so no
//! content is lost.

/// Language assumed for fences that carry no tag.
pub const DEFAULT_CODE_LANGUAGE: &str = "javascript";

/// A typed chunk of assistant output. Derived from the raw text on every
/// render, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code { language: String, content: String },
}

struct OpenFence<'a> {
    opener: &'a str,
    language: String,
    lines: Vec<&'a str>,
}

/// Returns the fence language when `line` opens a fenced block.
fn fence_opener(line: &str) -> Option<String> {
    let tag = line.strip_prefix("```")?;
    if tag.is_empty() {
        return Some(DEFAULT_CODE_LANGUAGE.to_string());
    }
    if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Some(tag.to_string());
    }
    None
}

fn flush_text(lines: &mut Vec<&str>, segments: &mut Vec<Segment>) {
    if lines.is_empty() {
        return;
    }
    let joined = lines.join("\n");
    lines.clear();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::Text(trimmed.to_string()));
    }
}

/// Parses `raw` into an ordered segment sequence. Segments whose trimmed
/// content is empty are dropped.
pub fn segment(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text_lines: Vec<&str> = Vec::new();
    let mut fence: Option<OpenFence<'_>> = None;

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if fence.is_some() && line == "```" {
            if let Some(open) = fence.take() {
                let content = open.lines.join("\n");
                let content = content.trim();
                if !content.is_empty() {
                    segments.push(Segment::Code {
                        language: open.language,
                        content: content.to_string(),
                    });
                }
            }
            continue;
        }
        if let Some(open) = fence.as_mut() {
            open.lines.push(line);
            continue;
        }
        match fence_opener(line) {
            Some(language) => {
                flush_text(&mut text_lines, &mut segments);
                fence = Some(OpenFence {
                    opener: line,
                    language,
                    lines: Vec::new(),
                });
            }
            None => text_lines.push(line),
        }
    }

    // An unterminated fence is not a block; give its lines back to the text
    // stream, opener included.
    if let Some(open) = fence.take() {
        text_lines.push(open.opener);
        text_lines.extend(open.lines);
    }
    flush_text(&mut text_lines, &mut segments);

    segments
}
