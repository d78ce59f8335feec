use serde::Serialize;

use crate::storage::SearchHit;

/// Bodies longer than this are shown as head and tail only.
const MAX_BODY_LINES: usize = 100;
const HEAD_LINES: usize = 15;
const TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub file_path: String,
    pub name: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub distance: f32,
    pub truncated: bool,
    pub bytes: usize,
}

pub fn simplify_code(text: &str) -> (String, bool) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= MAX_BODY_LINES {
        return (text.to_string(), false);
    }

    let head = &lines[..HEAD_LINES];
    let tail = &lines[lines.len() - TAIL_LINES..];

    let mut out = head.join("\n");
    out.push_str(&format!(
        "\n... ({} lines omitted) ...\n",
        lines.len() - HEAD_LINES - TAIL_LINES
    ));
    out.push_str(&tail.join("\n"));
    (out, true)
}

pub fn location(hit: &SearchHit) -> String {
    let f = &hit.function;
    match (f.start_line, f.end_line) {
        (Some(start), Some(end)) => format!("{}:{}-{}", f.file_path, start, end),
        (Some(start), None) => format!("{}:{}", f.file_path, start),
        _ => f.file_path.clone(),
    }
}

/// One hit rendered as a commented header plus its (possibly shortened) code.
pub fn format_hit(hit: &SearchHit) -> (String, bool) {
    let (code, truncated) = simplify_code(&hit.function.content);
    let block = format!(
        "// {} {} (distance {:.3})\n{}\n",
        location(hit),
        hit.function.function_name,
        hit.distance,
        code
    );
    (block, truncated)
}

/// Concatenate hits in rank order until `max_bytes` is reached.
///
/// The first block is cut at a char boundary if it alone exceeds the budget;
/// later blocks that do not fit are dropped.
pub fn format_context(hits: &[SearchHit], max_bytes: usize) -> (String, Vec<ContextItem>) {
    let mut out = String::new();
    let mut items = Vec::new();

    for hit in hits {
        let (mut block, mut truncated) = format_hit(hit);
        let separator = if out.is_empty() { 0 } else { 1 };
        let remaining = max_bytes.saturating_sub(out.len() + separator);

        if block.len() > remaining {
            if !items.is_empty() || remaining == 0 {
                break;
            }
            block.truncate(floor_char_boundary(&block, remaining));
            truncated = true;
        }

        if separator == 1 {
            out.push('\n');
        }
        out.push_str(&block);
        items.push(ContextItem {
            id: hit.function.id.clone(),
            file_path: hit.function.file_path.clone(),
            name: hit.function.function_name.clone(),
            start_line: hit.function.start_line,
            end_line: hit.function.end_line,
            distance: hit.distance,
            truncated,
            bytes: block.len(),
        });
    }

    (out, items)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
