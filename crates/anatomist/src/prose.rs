//! Lexical detection of stray prose lines.
//!
//! Works on raw text rather than a tree because the files it matters for are
//! exactly the ones no grammar accepts. A line is reported when it starts at
//! bracket depth zero outside any string, comment or template literal, and
//! reads like an English sentence.

/// A line of prose sitting at module scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayLine {
    /// 1-based.
    pub line: u32,
    /// Byte offset of the first non-blank character.
    pub start_byte: usize,
    /// Byte offset of the line end (before `\n`).
    pub end_byte: usize,
    pub text: String,
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str(u8),
    Template,
}

pub fn stray_text_lines(source: &str) -> Vec<StrayLine> {
    let at_scope = module_scope_line_starts(source.as_bytes());
    let mut found = Vec::new();
    let mut offset = 0usize;

    for (n, raw) in source.split('\n').enumerate() {
        let trimmed = raw.trim();
        if at_scope.get(n).copied().unwrap_or(false) && looks_like_prose(trimmed) {
            let start = offset + (raw.len() - raw.trim_start().len());
            found.push(StrayLine {
                line: n as u32 + 1,
                start_byte: start,
                end_byte: start + trimmed.len(),
                text: trimmed.to_string(),
            });
        }
        offset += raw.len() + 1;
    }
    found
}

/// For each line, whether it begins in plain code at bracket depth zero.
fn module_scope_line_starts(bytes: &[u8]) -> Vec<bool> {
    let mut starts = vec![true];
    let mut state = State::Code;
    let mut depth: u32 = 0;
    // Depth at which each open `${` was entered.
    let mut templates: Vec<u32> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        let mut step = 1;
        match state {
            State::Code => match b {
                b'/' if next == Some(b'/') => {
                    state = State::LineComment;
                    step = 2;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    step = 2;
                }
                b'\'' | b'"' => state = State::Str(b),
                b'`' => state = State::Template,
                b'{' | b'(' | b'[' => depth += 1,
                b'}' if templates.last() == Some(&depth) => {
                    templates.pop();
                    state = State::Template;
                }
                b'}' | b')' | b']' => depth = depth.saturating_sub(1),
                _ => {}
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    step = 2;
                }
            }
            State::Str(q) => {
                if b == b'\\' {
                    step = 2;
                } else if b == q || b == b'\n' {
                    // Unterminated strings end at the newline.
                    state = State::Code;
                }
            }
            State::Template => {
                if b == b'\\' {
                    step = 2;
                } else if b == b'`' {
                    state = State::Code;
                } else if b == b'$' && next == Some(b'{') {
                    templates.push(depth);
                    state = State::Code;
                    step = 2;
                }
            }
        }

        let end = (i + step).min(bytes.len());
        for &c in &bytes[i..end] {
            if c == b'\n' {
                starts.push(state == State::Code && depth == 0);
            }
        }
        i = end;
    }
    starts
}

/// Capitalized first word, at least three words, letters and light
/// punctuation only.
fn looks_like_prose(line: &str) -> bool {
    let body = line.trim_end_matches(['.', '!', '?', ':']);
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.len() < 3 {
        return false;
    }
    if !words[0].chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }
    words.iter().all(|w| {
        w.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '\'' | ',' | '-'))
    })
}
