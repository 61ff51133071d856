//! Brace-depth JSON object boundary detection
//!
//! A single line of agent output can hold several JSON objects, an object
//! surrounded by plain text, or the opening of an object that continues on
//! the next line. The scanner splits text at top-level object boundaries,
//! tracking string literals and escapes so braces inside strings are ignored.

/// One piece of scanned text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// A balanced `{...}` span
    Object(&'a str),
    /// Text outside any object
    Text(&'a str),
}

/// Result of scanning one block of text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scan<'a> {
    /// Complete segments in order
    pub segments: Vec<Segment<'a>>,
    /// Byte offset of an object that was opened but never closed
    pub open_at: Option<usize>,
}

impl Scan<'_> {
    /// True when the text ends inside an unterminated object
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.open_at.is_some()
    }

    /// Number of balanced objects found
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Object(_)))
            .count()
    }
}

/// Split `text` into top-level objects and surrounding text
#[must_use]
pub fn scan(text: &str) -> Scan<'_> {
    let mut scan = Scan::default();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut object_start = 0usize;
    let mut text_start = 0usize;

    for (idx, ch) in text.char_indices() {
        if depth == 0 {
            if ch == '{' {
                if idx > text_start {
                    scan.segments.push(Segment::Text(&text[text_start..idx]));
                }
                object_start = idx;
                depth = 1;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = idx + ch.len_utf8();
                    scan.segments.push(Segment::Object(&text[object_start..end]));
                    text_start = end;
                }
            }
            _ => {}
        }
    }

    if depth > 0 {
        scan.open_at = Some(object_start);
    } else if text_start < text.len() {
        scan.segments.push(Segment::Text(&text[text_start..]));
    }

    scan
}
