//! Response decoding — recover a `{text, code}` pair from whatever the
//! remote assistant actually sent back.
//!
//! The assistant's output is itself generated text, so the payload may be a
//! well-formed JSON object, a malformed JSON string, or free text. Decoding
//! never fails: each stage is strictly more permissive than the previous,
//! and the terminal stage treats the whole payload as plain text. Degraded
//! quality is reported only through the [`NoticeSink`] side-channel.
//!
//! Stage order matters — stricter parses, when they succeed, are more
//! trustworthy:
//! 1. object passthrough
//! 2. strict JSON parse
//! 3. control-character repair, then re-parse ([`repair`])
//! 4. per-field extraction ([`extract`])
//! 5. plain-text fallback

pub mod extract;
pub mod repair;

use crate::notice::{Notice, NoticeSink};
use serde_json::Value;

/// Field holding the assistant's prose reply.
pub const TEXT_FIELD: &str = "response_text";
/// Field holding the assistant's generated code.
pub const CODE_FIELD: &str = "response_code";

/// A normalized assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub code: String,
}

/// Decode a raw response payload.
///
/// Objects (and arrays, which simply have no fields) take the passthrough
/// path; strings run the full cascade. Any other shape is reported as a
/// warning and decoded as an explicit error marker so it is never silently
/// dropped.
pub fn decode(raw: &Value, sink: &dyn NoticeSink) -> Decoded {
    match raw {
        Value::Object(_) | Value::Array(_) => extract_fields(raw),
        Value::String(s) => decode_str(s, sink),
        _ => {
            tracing::warn!(kind = raw_kind(raw), "unexpected response payload type");
            sink.notify(Notice::warning(
                "Received unexpected data format from the assistant.",
            ));
            Decoded {
                text: "[Error: unexpected response format]".into(),
                code: String::new(),
            }
        }
    }
}

/// Run the string cascade (stages 2-5) on a raw string payload.
pub fn decode_str(raw: &str, sink: &dyn NoticeSink) -> Decoded {
    // Stage 2: strict parse. A successful parse of a non-object still counts;
    // it just has no fields to extract.
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return extract_fields(&parsed);
    }

    // Stage 3: escape stray control characters inside the known fields, then
    // re-parse.
    let repaired = repair::repair_known_fields(raw);
    if repaired != raw {
        if let Ok(parsed) = serde_json::from_str::<Value>(&repaired) {
            tracing::debug!("response recovered after control-character repair");
            return extract_fields(&parsed);
        }
    }

    // Stage 4: pull each field straight out of the malformed payload.
    let text = extract::extract_field(raw, TEXT_FIELD);
    let code = extract::extract_field(raw, CODE_FIELD);
    if text.is_some() || code.is_some() {
        tracing::debug!("response fields extracted from malformed payload");
        return Decoded {
            text: text.unwrap_or_default(),
            code: code.unwrap_or_default(),
        };
    }

    // Stage 5: plain text. Always succeeds.
    tracing::warn!("all response parse strategies failed, treating as plain text");
    sink.notify(Notice::warning(
        "Received a malformed response. Displaying raw data.",
    ));
    Decoded {
        text: raw.to_string(),
        code: String::new(),
    }
}

/// Stage-1 extraction: read the two known fields off an already-parsed
/// value, defaulting each absent (or non-string) field to empty.
fn extract_fields(value: &Value) -> Decoded {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Decoded {
        text: field(TEXT_FIELD),
        code: field(CODE_FIELD),
    }
}

fn raw_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::CollectingSink;
    use serde_json::json;

    fn decode_quiet(raw: &Value) -> Decoded {
        decode(raw, &CollectingSink::new())
    }

    // ── Stage 1: object passthrough ──────────────────────────────

    #[test]
    fn well_formed_object_is_identity() {
        let raw = json!({
            "response_text": "Here is your sensor.",
            "response_code": "sensor:\n  platform: template",
        });
        let decoded = decode_quiet(&raw);
        assert_eq!(decoded.text, "Here is your sensor.");
        assert_eq!(decoded.code, "sensor:\n  platform: template");
    }

    #[test]
    fn absent_fields_default_to_empty() {
        let decoded = decode_quiet(&json!({ "response_text": "only text" }));
        assert_eq!(decoded.text, "only text");
        assert_eq!(decoded.code, "");

        let decoded = decode_quiet(&json!({ "unrelated": true }));
        assert_eq!(decoded, Decoded::default());
    }

    #[test]
    fn decoding_twice_is_a_no_op() {
        let raw = json!({ "response_text": "t", "response_code": "c" });
        let first = decode_quiet(&raw);
        let second = decode_quiet(&raw);
        assert_eq!(first, second);
    }

    // ── Stage 2: strict parse ────────────────────────────────────

    #[test]
    fn valid_json_string_parses_strictly() {
        let raw = Value::String(r#"{"response_text":"hi","response_code":"x = 1"}"#.into());
        let decoded = decode_quiet(&raw);
        assert_eq!(decoded.text, "hi");
        assert_eq!(decoded.code, "x = 1");
    }

    #[test]
    fn json_scalar_string_yields_empty_fields() {
        // "42" parses as a JSON number, which has no fields — matching the
        // passthrough defaulting, not the plain-text fallback.
        let decoded = decode_quiet(&Value::String("42".into()));
        assert_eq!(decoded, Decoded::default());
    }

    // ── Stage 3: repair ──────────────────────────────────────────

    #[test]
    fn raw_newlines_inside_fields_are_recovered() {
        let raw = Value::String(
            "{\"response_text\":\"line one\nline two\",\"response_code\":\"a\tb\"}".into(),
        );
        let decoded = decode_quiet(&raw);
        assert_eq!(decoded.text, "line one\nline two");
        assert_eq!(decoded.code, "a\tb");
    }

    // ── Stage 4: extraction ──────────────────────────────────────

    #[test]
    fn fields_extracted_from_truncated_payload() {
        // Trailing garbage after the fields keeps every parse from
        // succeeding, but the field values themselves are intact.
        let raw = Value::String(
            r#"{"response_text":"partial","response_code":"y = 2" garbage"#.into(),
        );
        let decoded = decode_quiet(&raw);
        assert_eq!(decoded.text, "partial");
        assert_eq!(decoded.code, "y = 2");
    }

    // ── Stage 5: plain text ──────────────────────────────────────

    #[test]
    fn unstructured_text_falls_through_with_one_notice() {
        let sink = CollectingSink::new();
        let raw = Value::String("The assistant wrote prose instead.".into());
        let decoded = decode(&raw, &sink);
        assert_eq!(decoded.text, "The assistant wrote prose instead.");
        assert_eq!(decoded.code, "");
        assert_eq!(sink.count(), 1);
    }

    // ── Invalid raw type ─────────────────────────────────────────

    #[test]
    fn non_object_non_string_becomes_error_marker() {
        let sink = CollectingSink::new();
        let decoded = decode(&json!(17), &sink);
        assert_eq!(decoded.text, "[Error: unexpected response format]");
        assert_eq!(decoded.code, "");
        assert_eq!(sink.count(), 1);

        let decoded = decode_quiet(&Value::Null);
        assert_eq!(decoded.text, "[Error: unexpected response format]");
    }

    #[test]
    fn arrays_take_the_passthrough_path() {
        // Structured but field-less: empty pair, no notice.
        let sink = CollectingSink::new();
        let decoded = decode(&json!(["a", "b"]), &sink);
        assert_eq!(decoded, Decoded::default());
        assert_eq!(sink.count(), 0);
    }
}
