//! Best-effort reading of a partial tool-argument JSON prefix.

use serde_json::Value;

const MAX_REPAIR_ATTEMPTS: usize = 16;

/// Interprets a cumulative argument prefix as JSON.
///
/// Open strings and containers are closed, dangling separators are trimmed and
/// incomplete trailing members are cut back until the text parses. Returns
/// `None` when nothing sensible remains; never panics on arbitrary input.
pub fn preview_arguments(partial: &str) -> Option<Value> {
    let trimmed = partial.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let mut end = trimmed.len();
    for _ in 0..MAX_REPAIR_ATTEMPTS {
        let candidate = close_open_json(&trimmed[..end]);
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
        end = last_cut_point(&trimmed[..end])?;
    }
    None
}

#[derive(Debug, Default)]
struct Scan {
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
}

fn scan(text: &str) -> Scan {
    let mut state = Scan::default();
    for ch in text.chars() {
        if state.in_string {
            match ch {
                _ if state.escaped => state.escaped = false,
                '\\' => state.escaped = true,
                '"' => state.in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => state.in_string = true,
            '{' => state.stack.push('}'),
            '[' => state.stack.push(']'),
            '}' | ']' => {
                state.stack.pop();
            }
            _ => {}
        }
    }
    state
}

fn close_open_json(text: &str) -> String {
    let state = scan(text);
    let mut out = text.to_string();

    if state.in_string {
        if state.escaped {
            out.pop();
        }
        out.push('"');
    }

    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }
    if out.ends_with(':') {
        out.push_str("null");
    }

    out.extend(state.stack.iter().rev());
    out
}

/// Largest byte offset below `text.len()` where a structural member starts:
/// just before a top-level-of-container comma or just after an opening bracket.
fn last_cut_point(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut cut = None;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ',' => cut = Some(index),
            '{' | '[' => cut = Some(index + ch.len_utf8()),
            _ => {}
        }
    }

    cut.filter(|cut| *cut < text.len())
}
