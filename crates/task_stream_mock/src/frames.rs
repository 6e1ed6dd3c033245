//! Builders for wire frames, so scripts read like the event sequence they replay.

use serde_json::{json, Value};

fn frame(event_id: &str, event_type: &str, content: Value) -> String {
    json!({
        "event_id": event_id,
        "event_type": event_type,
        "timestamp": 0.0,
        "content": content,
    })
    .to_string()
}

/// STREAM chunk in `state` (`thinking`, `content` or `complete`).
pub fn stream(event_id: &str, text: &str, state: &str, sequence: u64) -> String {
    frame(
        event_id,
        "STREAM",
        json!({
            "state": state,
            "content": text,
            "content_type": "markdown",
            "sequence": sequence,
            "is_thinking": state == "thinking",
        }),
    )
}

pub fn result_text(event_id: &str, text: &str) -> String {
    result(event_id, json!(text))
}

/// RESULT with an arbitrary (possibly structured) content value.
pub fn result(event_id: &str, content: Value) -> String {
    frame(
        event_id,
        "RESULT",
        json!({"content_type": "markdown", "content": content}),
    )
}

pub fn ask_user(event_id: &str, prompt: &str, options: &[&str]) -> String {
    frame(
        event_id,
        "ASK_USER",
        json!({"prompt": prompt, "options": options, "required": true}),
    )
}

pub fn error(event_id: &str, message: &str) -> String {
    frame(
        event_id,
        "ERROR",
        json!({"error_code": 500, "error_message": message}),
    )
}

pub fn completion(event_id: &str, message: &str) -> String {
    frame(
        event_id,
        "COMPLETION",
        json!({
            "success_code": 200,
            "success_message": message,
            "result": {},
            "completion_time": 0.0,
        }),
    )
}
