//! Best-effort completion of truncated JSON.
//!
//! Models stream JSON a few characters at a time, so the content of an open
//! fence is almost never valid on its own. [`repair_json`] closes whatever is
//! still open so the prefix can be parsed:
//!
//! 1. Scan once, tracking string state (unescaped `"` toggles, `\` escapes)
//!    and the stack of open `{` / `[` outside strings.
//! 2. If the scan ends inside a string, close it (dropping a dangling `\`).
//! 3. If the text ends right after a `:` inside an object, append `null`.
//! 4. Drop a trailing `,`.
//! 5. Close open containers innermost first.
//!
//! This is a heuristic, not a grammar: `{"a": tru` stays unparseable and the
//! caller gets `None`.

use serde_json::Value;

/// Complete a truncated JSON text so that it has a chance to parse.
///
/// Text that is already balanced is returned unchanged.
pub fn repair_json(text: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    let mut open: Vec<char> = Vec::new();

    for ch in text.chars() {
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
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&ch) {
                    let _ = open.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();

    if in_string {
        if escaped {
            let _ = repaired.pop();
        }
        repaired.push('"');
    } else {
        let trimmed_len = repaired.trim_end().len();
        repaired.truncate(trimmed_len);
        match repaired.chars().last() {
            Some(':') if open.last() == Some(&'}') => repaired.push_str("null"),
            Some(',') => {
                let _ = repaired.pop();
            }
            _ => {}
        }
    }

    while let Some(closer) = open.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Parse `text` strictly, falling back to [`repair_json`].
///
/// Returns `None` for empty input or when even the repaired text does not
/// parse.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(&repair_json(trimmed)).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
