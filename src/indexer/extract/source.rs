//! Lexical helpers for the pattern-based extractor.
//!
//! Comments are blanked rather than removed: every comment byte becomes a
//! space and newlines are kept, so byte offsets in the blanked text are
//! valid offsets into the original (line-ending normalized) source.

pub fn normalize_line_endings(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
}

pub fn blank_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut state = LexState::Code;

    while let Some(c) = chars.next() {
        match state {
            LexState::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = LexState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = LexState::BlockComment;
                }
                '"' => {
                    out.push(c);
                    state = LexState::Str;
                }
                '\'' => {
                    out.push(c);
                    state = LexState::Char;
                }
                _ => out.push(c),
            },
            LexState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = LexState::Code;
                } else {
                    blank(&mut out, c);
                }
            }
            LexState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = LexState::Code;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    blank(&mut out, c);
                }
            }
            LexState::Str | LexState::Char => {
                out.push(c);
                let quote = if state == LexState::Str { '"' } else { '\'' };
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || c == '\n' {
                    // An unterminated literal never spans lines.
                    state = LexState::Code;
                }
            }
        }
    }
    out
}

fn blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

/// Index of the delimiter closing the one at `open`, skipping string and
/// character literals. Returns `None` when the text ends first.
pub fn find_matching(text: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&open_ch) {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' || b == b'\'' {
            i = skip_literal(bytes, i);
            continue;
        }
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Returns the offset just past the literal starting at `start`.
fn skip_literal(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

pub fn skip_whitespace(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits a parameter list on top-level commas, dropping `void` and blanks.
pub fn split_parameters(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    out.push(current);

    out.into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != "void")
        .collect()
}

/// Maps byte offsets to 1-based line numbers.
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub fn line_of(&self, offset: usize) -> u32 {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanking_preserves_offsets_and_lines() {
        let src = "int a; /* multi\nline */ int b; // tail é\nint c;";
        let blanked = blank_comments(src);
        assert_eq!(blanked.len(), src.len());
        assert_eq!(blanked.matches('\n').count(), 2);
        assert!(!blanked.contains("multi"));
        assert!(!blanked.contains("tail"));
        assert_eq!(&blanked[..6], "int a;");
        let c_pos = src.find("int c").unwrap();
        assert_eq!(&blanked[c_pos..c_pos + 5], "int c");
    }

    #[test]
    fn comment_markers_inside_literals_are_code() {
        let src = r#"const char *url = "http://x/*y*/"; char q = '"'; // gone"#;
        let blanked = blank_comments(src);
        assert!(blanked.contains(r#""http://x/*y*/""#));
        assert!(blanked.contains(r#"'"'"#));
        assert!(!blanked.contains("gone"));
    }

    #[test]
    fn find_matching_skips_literals() {
        let text = r#"{ if (x) { s = "}"; c = '{'; } }"#;
        assert_eq!(find_matching(text, 0, b'{', b'}'), Some(text.len() - 1));
        assert_eq!(find_matching("{ {", 0, b'{', b'}'), None);
        assert_eq!(find_matching("(a, (b))", 0, b'(', b')'), Some(7));
    }

    #[test]
    fn split_parameters_respects_nesting() {
        assert_eq!(
            split_parameters(" int a , int b "),
            vec!["int a".to_string(), "int b".to_string()]
        );
        assert_eq!(
            split_parameters("void (*cb)(int, char), size_t n"),
            vec!["void (*cb)(int, char)".to_string(), "size_t n".to_string()]
        );
        assert!(split_parameters("void").is_empty());
        assert!(split_parameters("   ").is_empty());
    }

    #[test]
    fn line_index_maps_offsets() {
        let text = "a\nbb\n\nccc";
        let idx = LineIndex::new(text);
        assert_eq!(idx.line_of(0), 1);
        assert_eq!(idx.line_of(2), 2);
        assert_eq!(idx.line_of(5), 3);
        assert_eq!(idx.line_of(6), 4);
    }

    #[test]
    fn identifier_grammar() {
        assert!(is_identifier("_NVS_open2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn line_endings_normalize() {
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc");
    }
}
