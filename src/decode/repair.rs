//! Stage-3 repair — escape stray control characters inside the two known
//! response fields so a strict parse can be retried.
//!
//! The upstream model sometimes emits literal newlines, carriage returns,
//! tabs, or lone backslashes inside what should be an escaped JSON string
//! value. The repair pass walks the payload, and inside each
//! `"response_text"` / `"response_code"` string value:
//!
//! * a backslash not followed by a valid JSON escape character is doubled;
//! * a literal `\n`, `\r`, or `\t` not already escaped is replaced with its
//!   escaped form.
//!
//! Other control characters (form feed and friends) are left alone; payloads
//! containing them fall through to the extraction and plain-text stages.

use super::{CODE_FIELD, TEXT_FIELD};

/// Rewrite `raw` with the known fields' string values escaped. Regions that
/// do not match a complete `"field": "value"` shape are copied verbatim, so
/// the result equals the input whenever there is nothing to fix.
pub fn repair_known_fields(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut i = 0;

    while i < raw.len() {
        if let Some((consumed, rebuilt)) = match_field(&raw[i..]) {
            out.push_str(&rebuilt);
            i += consumed;
            continue;
        }
        let Some(ch) = raw[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

/// Escape one field value: double invalid-escape backslashes, replace raw
/// `\n`/`\r`/`\t`. Valid escape pairs and everything else pass through.
pub fn escape_field_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if is_valid_escape(next) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                // Invalid or trailing escape: double the backslash. The
                // following character is handled on its own next iteration.
                _ => out.push_str("\\\\"),
            },
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }

    out
}

/// Offset of the unescaped closing quote that terminates a string value
/// starting at the beginning of `s`, treating any `\X` pair as consumed.
pub(super) fn value_end(s: &str) -> Option<usize> {
    let mut iter = s.char_indices();
    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => {
                iter.next();
            }
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Try to match `"field" : "value"` at the start of `s` for either known
/// field. Returns the matched byte length and the normalized, escaped
/// replacement text.
fn match_field(s: &str) -> Option<(usize, String)> {
    let key = [TEXT_FIELD, CODE_FIELD].into_iter().find(|k| {
        s.starts_with('"') && s[1..].starts_with(k) && s[1 + k.len()..].starts_with('"')
    })?;

    let mut i = key.len() + 2;
    i += whitespace_len(&s[i..]);
    if !s[i..].starts_with(':') {
        return None;
    }
    i += 1;
    i += whitespace_len(&s[i..]);
    if !s[i..].starts_with('"') {
        return None;
    }
    i += 1;

    let value_start = i;
    let end = value_end(&s[value_start..])?;
    let value = &s[value_start..value_start + end];
    let consumed = value_start + end + 1;

    Some((consumed, format!("\"{key}\":\"{}\"", escape_field_value(value))))
}

fn whitespace_len(s: &str) -> usize {
    s.chars()
        .take_while(|c| c.is_ascii_whitespace())
        .map(char::len_utf8)
        .sum()
}

fn is_valid_escape(c: char) -> bool {
    matches!(c, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u')
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── escape_field_value ───────────────────────────────────────

    #[test]
    fn doubles_invalid_backslash() {
        assert_eq!(escape_field_value(r"C:\path"), r"C:\\path");
        assert_eq!(escape_field_value("tail\\"), "tail\\\\");
    }

    #[test]
    fn keeps_valid_escape_pairs() {
        assert_eq!(escape_field_value(r"a\nb"), r"a\nb");
        assert_eq!(escape_field_value(r#"say \"hi\""#), r#"say \"hi\""#);
        assert_eq!(escape_field_value(r"unicode \u0041"), r"unicode \u0041");
    }

    #[test]
    fn escapes_raw_control_characters() {
        assert_eq!(escape_field_value("a\nb"), r"a\nb");
        assert_eq!(escape_field_value("a\rb"), r"a\rb");
        assert_eq!(escape_field_value("a\tb"), r"a\tb");
    }

    #[test]
    fn backslash_then_raw_newline_yields_both_escapes() {
        // The backslash is an invalid escape (doubled), then the newline is
        // escaped on its own.
        assert_eq!(escape_field_value("a\\\nb"), "a\\\\\\nb");
    }

    #[test]
    fn form_feed_is_left_alone() {
        // Deliberately outside the repair set; such payloads fall through to
        // later stages.
        assert_eq!(escape_field_value("a\u{0c}b"), "a\u{0c}b");
    }

    // ── repair_known_fields ──────────────────────────────────────

    #[test]
    fn repairs_both_fields_into_parseable_json() {
        let raw = "{\"response_text\": \"one\ntwo\", \"response_code\": \"x\ty\"}";
        let repaired = repair_known_fields(raw);
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["response_text"], "one\ntwo");
        assert_eq!(parsed["response_code"], "x\ty");
    }

    #[test]
    fn untouched_when_nothing_matches() {
        let raw = "no fields here at all";
        assert_eq!(repair_known_fields(raw), raw);

        let raw = r#"{"other_field":"value"}"#;
        assert_eq!(repair_known_fields(raw), raw);
    }

    #[test]
    fn unterminated_value_is_copied_verbatim() {
        let raw = r#"{"response_text":"never closes"#;
        assert_eq!(repair_known_fields(raw), raw);
    }

    #[test]
    fn whitespace_around_colon_is_normalized() {
        let raw = "{\"response_text\"  :  \"ok\"}";
        assert_eq!(repair_known_fields(raw), r#"{"response_text":"ok"}"#);
    }

    #[test]
    fn value_end_respects_escape_pairs() {
        assert_eq!(value_end(r#"plain" rest"#), Some(5));
        assert_eq!(value_end(r#"with \" quote" rest"#), Some(13));
        assert_eq!(value_end("no quote at all"), None);
    }
}
