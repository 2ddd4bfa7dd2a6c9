//! Pulls code out of free-form model replies.
//!
//! Two modes with deliberately different strictness:
//! - function mode accepts a ```python fence or, failing that, the whole
//!   reply, then locates a single `def`;
//! - page mode requires a ```typescript / ```tsx / ```ts fence.

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::{ServiceError, ServiceResult};

static PYTHON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```python(.*?)```").expect("valid regex"));

static PAGE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:typescript|tsx|ts)\s*(.*?)```").expect("valid regex"));

static DEF_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\bdef\s+(\w+)\s*\(.*?\)\s*(?:->\s*[^:\n]+)?:").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCode {
    pub code: String,
    pub function_name: String,
}

pub fn extract_function(reply: &str) -> ServiceResult<FunctionCode> {
    let candidate = match PYTHON_FENCE.captures(reply) {
        Some(c) => c.get(1).map_or("", |m| m.as_str()).trim(),
        None => reply.trim(),
    };

    let header = DEF_HEADER.captures(candidate).ok_or_else(|| {
        ServiceError::Extraction("No valid Python function definition found.".into())
    })?;
    let (start, header_end) = header.get(0).map_or((0, 0), |m| (m.start(), m.end()));
    let function_name = header[1].to_string();

    let end = definition_end(candidate, start, header_end);
    Ok(FunctionCode {
        code: candidate[start..end].trim().to_string(),
        function_name,
    })
}

/// Byte offset where the definition starting at `def_at` ends: the end of the
/// last line indented deeper than the `def` line. Blank lines inside the body
/// are kept; trailing ones are not. Lines inside an open triple-quoted string
/// belong to the body whatever their indentation.
fn definition_end(text: &str, def_at: usize, header_end: usize) -> usize {
    let line_start = text[..def_at].rfind('\n').map_or(0, |i| i + 1);
    let def_indent = indent_width(&text[line_start..def_at]);

    // The header line (and a one-line body after the colon) always belongs.
    let mut end = text[header_end..].find('\n').map_or(text.len(), |i| header_end + i);
    let mut open = string_state(&text[header_end..end], None);
    let mut cursor = end;

    while cursor < text.len() {
        let next_start = cursor + 1;
        let next_end = text[next_start..].find('\n').map_or(text.len(), |i| next_start + i);
        let line = &text[next_start..next_end];
        cursor = next_end;
        if open.is_none() {
            if line.trim().is_empty() {
                continue;
            }
            if indent_width(line) <= def_indent {
                break;
            }
        }
        open = string_state(line, open);
        end = next_end;
    }
    end
}

/// Triple-quote delimiter still open after scanning `line`, given the one open
/// before it.
fn string_state(line: &str, mut open: Option<&'static str>) -> Option<&'static str> {
    let mut rest = line;
    loop {
        match open {
            Some(quote) => match rest.find(quote) {
                Some(i) => {
                    rest = &rest[i + quote.len()..];
                    open = None;
                }
                None => return open,
            },
            None => {
                let next = ["\"\"\"", "'''"]
                    .into_iter()
                    .filter_map(|q| rest.find(q).map(|i| (i, q)))
                    .min_by_key(|(i, _)| *i);
                match next {
                    Some((i, quote)) => {
                        rest = &rest[i + quote.len()..];
                        open = Some(quote);
                    }
                    None => return None,
                }
            }
        }
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

pub fn extract_page(reply: &str) -> ServiceResult<String> {
    PAGE_FENCE
        .captures(reply)
        .map(|c| c[1].trim().to_string())
        .ok_or_else(|| ServiceError::Extraction("No valid TypeScript code block found.".into()))
}
