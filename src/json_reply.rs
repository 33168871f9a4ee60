//! Extraction of JSON objects from free-form model replies.
//!
//! Models asked for "JSON only" still wrap it in prose or code fences.
//! [`extract_json_object`] finds the first balanced `{...}` span, honouring
//! string literals and escapes so braces inside values do not confuse the
//! depth count. [`parse_json_reply`] decodes that span into a typed value.
//!
//! The `lenient_*` field decoders are for reply structs: a field of the
//! wrong type degrades to its default instead of failing the whole reply.
//! Numbers and booleans read as text, `null` reads as absent, and list
//! items that do not decode are dropped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ReplyParseError;

/// Return the first balanced `{...}` span in `text`, if any.
///
/// A `{` that never closes is skipped and scanning resumes at the next `{`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            return Some(&text[open..=close]);
        }
        start = open + 1;
    }
    None
}

/// Index of the `}` closing the `{` at `open`, scanning byte-wise.
/// Multi-byte UTF-8 sequences never contain ASCII bytes, so this is safe.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first JSON object from a model reply and decode it.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, ReplyParseError> {
    let block = extract_json_object(text).ok_or(ReplyParseError::NoJsonBlock)?;
    serde_json::from_str(block).map_err(|e| ReplyParseError::Decode(e.to_string()))
}

/// Text field: strings as-is, numbers and booleans rendered, anything else absent.
pub fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(scalar_text(&Value::deserialize(deserializer)?))
}

/// List-of-text field. A bare scalar counts as a one-item list; a blank
/// string as an empty one.
pub fn lenient_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(&other)
            .filter(|s| !s.trim().is_empty())
            .into_iter()
            .collect(),
    })
}

/// List-of-objects field. Items that fail to decode as `T` are skipped.
pub fn lenient_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        medication: String,
    }

    #[test]
    fn bare_json() {
        let text = r#"{"medication": "metformin"}"#;
        assert_eq!(extract_json_object(text), Some(text));
        let reply: Reply = parse_json_reply(text).unwrap();
        assert_eq!(reply.medication, "metformin");
    }

    #[test]
    fn prose_wrapped_json() {
        let text = "Sure! Here is the suggestion:\n{\"medication\": \"lisinopril\"}\nLet me know.";
        let reply: Reply = parse_json_reply(text).unwrap();
        assert_eq!(reply.medication, "lisinopril");
    }

    #[test]
    fn fenced_json() {
        let text = "```json\n{\"medication\": \"sertraline\"}\n```";
        let reply: Reply = parse_json_reply(text).unwrap();
        assert_eq!(reply.medication, "sertraline");
    }

    #[test]
    fn nested_objects_and_trailing_prose() {
        let text = r#"Result: {"a": {"b": [1, {"c": 2}]}} and also {"d": 3}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": [1, {"c": 2}]}}"#)
        );
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"warning": "avoid } and { in text", "x": "quote \" brace }"} tail"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"warning": "avoid } and { in text", "x": "quote \" brace }"}"#)
        );
    }

    #[test]
    fn unclosed_brace_is_skipped() {
        let text = r#"Use { carefully. {"medication": "ibuprofen"}"#;
        let reply: Reply = parse_json_reply(text).unwrap();
        assert_eq!(reply.medication, "ibuprofen");
    }

    #[test]
    fn unparsable_text() {
        assert_eq!(
            parse_json_reply::<Reply>("No JSON here at all."),
            Err(ReplyParseError::NoJsonBlock)
        );
        assert!(matches!(
            parse_json_reply::<Reply>("{medication: metformin}"),
            Err(ReplyParseError::Decode(_))
        ));
    }

    #[test]
    fn lenient_fields_degrade_per_field() {
        #[derive(Debug, Deserialize)]
        struct Item {
            name: String,
        }

        #[derive(Debug, Deserialize)]
        struct Loose {
            #[serde(default, deserialize_with = "lenient_string")]
            duration: Option<String>,
            #[serde(default, deserialize_with = "lenient_string")]
            note: Option<String>,
            #[serde(default, deserialize_with = "lenient_strings")]
            tags: Vec<String>,
            #[serde(default, deserialize_with = "lenient_items")]
            items: Vec<Item>,
            #[serde(default, deserialize_with = "lenient_items")]
            missing: Vec<Item>,
        }

        let text = r#"{"duration": 30, "note": {"x": 1}, "tags": ["a", 2, null, true],
            "items": [{"name": "kept"}, "junk", {"other": 1}]}"#;
        let loose: Loose = parse_json_reply(text).unwrap();
        assert_eq!(loose.duration.as_deref(), Some("30"));
        assert!(loose.note.is_none());
        assert_eq!(loose.tags, vec!["a", "2", "true"]);
        assert_eq!(loose.items.len(), 1);
        assert_eq!(loose.items[0].name, "kept");
        assert!(loose.missing.is_empty());

        let loose: Loose = parse_json_reply(r#"{"tags": "solo", "items": null}"#).unwrap();
        assert_eq!(loose.tags, vec!["solo"]);
        assert!(loose.items.is_empty());

        let loose: Loose = parse_json_reply(r#"{"tags": "  "}"#).unwrap();
        assert!(loose.tags.is_empty());
    }

    #[test]
    fn non_ascii_text_around_json() {
        let text = "Résumé … voilà: {\"medication\": \"céphalexine\"} ✓";
        let reply: Reply = parse_json_reply(text).unwrap();
        assert_eq!(reply.medication, "céphalexine");
    }
}
