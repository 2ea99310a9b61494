//! Task payload parsing.
//!
//! A task set arrives as one command-line token that may be raw JSON,
//! base64-encoded JSON, or explicitly prefixed `base64:` / `b64:`.
//! JSON is always tried first; the auto-detect path only runs when the
//! raw parse fails, so a valid JSON string that happens to contain only
//! base64-legal characters is never decoded by accident. Auto-detection
//! additionally requires the decoded bytes to be printable ASCII.

use cortex_api::*;

/// One parsed task, before any dispatch bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTask {
    /// Identifies the task within the request.
    pub task_id: TaskId,

    /// The opaque payload handed to a worker.
    pub payload: serde_json::Value,

    /// Optional opaque metadata handed along with the payload.
    pub metadata: Option<serde_json::Value>,
}

/// Decode a payload token into JSON. Strict: a token that is neither
/// JSON nor decodable base64-of-JSON is malformed.
pub fn decode_payload(input: &str) -> CxResult<serde_json::Value> {
    let input = input.trim();

    // an explicit prefix forces the base64 path
    for prefix in ["base64:", "b64:"] {
        if input.len() >= prefix.len()
            && input[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            let decoded = decode_base64(&input[prefix.len()..]).ok_or_else(
                || CxError::malformed("invalid base64 payload"),
            )?;
            return serde_json::from_slice(&decoded).map_err(|e| {
                CxError::other_src("base64 payload is not valid JSON", e)
            });
        }
    }

    if let Ok(value) = serde_json::from_str(input) {
        return Ok(value);
    }

    // auto-detect: base64-legal token whose decoded bytes are printable
    if looks_like_base64(input) {
        if let Some(decoded) = decode_base64(input) {
            if is_printable_ascii(&decoded) {
                if let Ok(value) = serde_json::from_slice(&decoded) {
                    return Ok(value);
                }
            }
        }
    }

    Err(CxError::malformed("payload is neither JSON nor base64 JSON"))
}

/// Decode a worker-reported result token. Lenient: a token that decodes
/// to nothing falls back to a plain JSON string.
pub fn decode_result(input: &str) -> serde_json::Value {
    decode_payload(input)
        .unwrap_or_else(|_| serde_json::Value::String(input.to_string()))
}

/// Parse and normalize a task-set token into an ordered task list.
pub fn parse_tasks(input: &str) -> CxResult<Vec<ParsedTask>> {
    let value = decode_payload(input)?;
    let tasks = normalize(value);
    if tasks.is_empty() {
        return Err(CxError::NoTasks);
    }
    Ok(tasks)
}

/// Keys that configure an object-form task set rather than naming tasks.
const RESERVED_KEYS: &[&str] = &["metadata", "config"];

fn normalize(value: serde_json::Value) -> Vec<ParsedTask> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| normalize_element(i, item))
            .collect(),
        serde_json::Value::Object(map) => {
            if let Some(tasks) = map.get("tasks") {
                return normalize(tasks.clone());
            }
            map.into_iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| ParsedTask {
                    task_id: k.into(),
                    payload: v,
                    metadata: None,
                })
                .collect()
        }
        // a bare scalar is a single-task set
        other => vec![ParsedTask {
            task_id: "task-1".into(),
            payload: other,
            metadata: None,
        }],
    }
}

fn normalize_element(index: usize, item: serde_json::Value) -> ParsedTask {
    let default_id = || TaskId::from(format!("task-{}", index + 1));
    match item {
        serde_json::Value::Object(map) => {
            let task_id = ["taskId", "id"]
                .iter()
                .find_map(|k| id_from_value(map.get(*k)?))
                .unwrap_or_else(default_id);
            let metadata = map.get("metadata").cloned();
            let payload = ["payload", "value", "data"]
                .iter()
                .find_map(|k| map.get(*k).cloned())
                .unwrap_or(serde_json::Value::Object(map));
            ParsedTask {
                task_id,
                payload,
                metadata,
            }
        }
        other => ParsedTask {
            task_id: default_id(),
            payload: other,
            metadata: None,
        },
    }
}

fn id_from_value(value: &serde_json::Value) -> Option<TaskId> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => {
            Some(s.as_str().into())
        }
        serde_json::Value::Number(n) => Some(n.to_string().into()),
        _ => None,
    }
}

fn looks_like_base64(input: &str) -> bool {
    !input.is_empty()
        && input.len() % 4 != 1
        && input.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'+' | b'/' | b'-' | b'_' | b'=')
        })
}

fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| (0x20..0x7f).contains(b) || matches!(b, b'\n' | b'\r' | b'\t'))
}

/// Accepts standard and URL-safe alphabets, padding optional.
pub(crate) fn decode_base64(input: &str) -> Option<Vec<u8>> {
    use base64::prelude::*;
    let input = input.trim_end_matches('=');
    BASE64_STANDARD_NO_PAD
        .decode(input)
        .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(input))
        .ok()
}
