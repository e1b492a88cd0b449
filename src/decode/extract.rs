//! Stage-4 extraction — pull a field's raw value straight out of a payload
//! that no parse will accept, then unescape it by hand.
//!
//! Each field is recovered independently: a payload with a readable
//! `response_text` but a hopeless `response_code` still yields the text.

use super::repair::value_end;

/// Find `"key" : "value"` anywhere in `raw` and return the unescaped value.
///
/// The value span ends at the first unescaped quote, with `\X` pairs
/// consumed atomically, so embedded raw newlines survive extraction.
pub fn extract_field(raw: &str, key: &str) -> Option<String> {
    let quoted = format!("\"{key}\"");

    for (pos, _) in raw.match_indices(&quoted) {
        let rest = &raw[pos + quoted.len()..];
        let after_ws = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        let Some(after_colon) = after_ws.strip_prefix(':') else {
            continue;
        };
        let after_ws = after_colon.trim_start_matches(|c: char| c.is_ascii_whitespace());
        let Some(value) = after_ws.strip_prefix('"') else {
            continue;
        };
        if let Some(end) = value_end(value) {
            return Some(unescape(&value[..end]));
        }
    }

    None
}

/// Unescape the standard sequences (`\n`, `\r`, `\t`, `\"`, `\\`) in a
/// single left-to-right pass. Unknown escapes are left intact.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
