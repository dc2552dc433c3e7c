//! Turning HTTP requests into publish intents.
//!
//! `GET /post/<topic...>` exposes qos and retain. `POST /post/` always uses the
//! broker defaults; its body is first run through [`normalize_body`].

use crate::error::BridgeError;
use crate::models::PublishIntent;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type QueryParams = HashMap<String, String>;

/// Builds the intent for the GET variant from the raw request path.
///
/// Everything after the `/post/` route prefix is the topic, kept exactly as
/// sent (no percent-decoding) apart from trimming surrounding slashes.
pub fn intent_from_get(request_path: &str, query: &QueryParams) -> PublishIntent {
    let topic = topic_from_path(request_path);
    let message = query.get("message").cloned().unwrap_or_default();
    let qos = query.get("qos").map(|raw| parse_qos(raw)).unwrap_or(0);
    let retain = query.get("retain").is_some_and(|raw| parse_retain(raw));

    PublishIntent::new(topic, message).with_options(qos, retain)
}

fn topic_from_path(request_path: &str) -> String {
    let remainder: Vec<&str> = request_path.split('/').skip(2).collect();
    remainder.join("/").trim_matches('/').to_string()
}

/// Integer-prefix parse of a qos value; anything without leading digits is 0.
pub fn parse_qos(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    match digits[..end].parse::<i64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) => 0,
    }
}

pub fn parse_retain(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}

/// Runs the POST pre-processing chain over the request body, in order:
/// message indirection through `path`, then the `topic` query override.
pub fn normalize_body(fields: &mut Map<String, Value>, query: &QueryParams) {
    apply_message_path(fields, query);
    apply_topic_override(fields, query);
}

/// `?path=<field>` makes the named body field the message.
fn apply_message_path(fields: &mut Map<String, Value>, query: &QueryParams) {
    let Some(path) = query.get("path").filter(|path| !path.is_empty()) else {
        return;
    };

    match fields.get(path).cloned() {
        Some(value) => {
            fields.insert("message".to_string(), value);
        }
        None => {
            fields.remove("message");
        }
    }
}

fn apply_topic_override(fields: &mut Map<String, Value>, query: &QueryParams) {
    if let Some(topic) = query.get("topic").filter(|topic| !topic.is_empty()) {
        fields.insert("topic".to_string(), Value::String(topic.clone()));
    }
}

/// Final step of the POST chain: a topic must be present by now.
pub fn intent_from_body(fields: &Map<String, Value>) -> Result<PublishIntent, BridgeError> {
    let topic = match fields.get("topic") {
        Some(Value::String(topic)) if !topic.is_empty() => topic.clone(),
        Some(Value::Number(number)) if !is_zero(number) => number.to_string(),
        _ => return Err(BridgeError::TopicNotSpecified),
    };

    let payload = match fields.get("message") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(message)) => message.clone().into_bytes(),
        Some(other) => other.to_string().into_bytes(),
    };

    Ok(PublishIntent::new(topic, payload))
}

/// A numeric zero counts as "not given", like an empty string.
pub fn is_zero(number: &serde_json::Number) -> bool {
    number.as_f64() == Some(0.0)
}
