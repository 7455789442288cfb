//! Reply parsing: model text → Record / RecordList / RawText.
//!
//! Even when asked for bare JSON, models often wrap the reply in a
//! ` ```json … ``` ` fence. The fence markers are removed as literal
//! substrings, the rest is trimmed and parsed strictly. Anything that does not
//! parse is a valid outcome, kept verbatim as [`ExtractionResult::RawText`].

use crate::output::{ExtractionResult, Record};
use serde_json::{Map, Value};
use tracing::debug;

/// Key used when an array element is a scalar instead of an object.
pub const SCALAR_ELEMENT_KEY: &str = "value";

/// Remove every ` ```json ` and ` ``` ` marker and trim surrounding whitespace.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse a model reply for `document`.
///
/// - JSON object → [`ExtractionResult::Record`]
/// - JSON array → [`ExtractionResult::RecordList`] (scalar elements become
///   `{"value": …}` records)
/// - anything else → [`ExtractionResult::RawText`] with the fence-stripped text
pub fn parse_reply(document: &str, raw: &str) -> ExtractionResult {
    let text = strip_code_fences(raw);

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(fields)) => ExtractionResult::Record(Record::new(document, fields)),
        Ok(Value::Array(items)) => ExtractionResult::RecordList {
            document: document.to_string(),
            records: items
                .into_iter()
                .map(|item| Record::new(document, into_fields(item)))
                .collect(),
        },
        Ok(other) => {
            debug!("{}: reply is a JSON {}, keeping as text", document, kind(&other));
            ExtractionResult::RawText {
                document: document.to_string(),
                text,
            }
        }
        Err(e) => {
            debug!("{}: reply is not JSON ({})", document, e);
            ExtractionResult::RawText {
                document: document.to_string(),
                text,
            }
        }
    }
}

fn into_fields(item: Value) -> Map<String, Value> {
    match item {
        Value::Object(map) => map,
        scalar => {
            let mut map = Map::new();
            map.insert(SCALAR_ELEMENT_KEY.to_string(), scalar);
            map
        }
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
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
    use serde_json::json;

    #[test]
    fn fenced_object_becomes_record() {
        let r = parse_reply("a.png", "```json\n{\"x\":1}\n```");
        match r {
            ExtractionResult::Record(rec) => {
                assert_eq!(rec.document, "a.png");
                assert_eq!(Value::Object(rec.fields), json!({"x": 1}));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_raw() {
        assert_eq!(
            parse_reply("a.png", "not json at all"),
            ExtractionResult::RawText {
                document: "a.png".into(),
                text: "not json at all".into()
            }
        );
    }

    #[test]
    fn raw_text_is_fence_stripped() {
        let r = parse_reply("a.png", "```\nSorry, I can't read this.\n```");
        assert_eq!(
            r,
            ExtractionResult::RawText {
                document: "a.png".into(),
                text: "Sorry, I can't read this.".into()
            }
        );
    }

    #[test]
    fn array_becomes_tagged_record_list() {
        let r = parse_reply("list.png", "[{\"a\":1},{\"a\":2,\"b\":\"x\"}]");
        match r {
            ExtractionResult::RecordList { document, records } => {
                assert_eq!(document, "list.png");
                assert_eq!(records.len(), 2);
                assert!(records.iter().all(|r| r.document == "list.png"));
                assert_eq!(records[1].fields["b"], json!("x"));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn scalar_array_elements_are_wrapped() {
        let ExtractionResult::RecordList { records, .. } = parse_reply("s.png", "[1, \"two\"]")
        else {
            panic!("expected list");
        };
        assert_eq!(records[0].fields[SCALAR_ELEMENT_KEY], json!(1));
        assert_eq!(records[1].fields[SCALAR_ELEMENT_KEY], json!("two"));
    }

    #[test]
    fn json_scalar_reply_is_raw_text() {
        assert!(matches!(
            parse_reply("n.png", "42"),
            ExtractionResult::RawText { ref text, .. } if text == "42"
        ));
    }

    #[test]
    fn key_order_follows_reply() {
        let ExtractionResult::Record(rec) = parse_reply("o.png", r#"{"z":1,"a":2,"m":3}"#) else {
            panic!("expected record");
        };
        let keys: Vec<&str> = rec.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn strip_handles_inline_fences() {
        assert_eq!(strip_code_fences("  ```json{\"k\":true}```  "), "{\"k\":true}");
    }
}
