//! Pre-handler stages every request passes through, outermost first:
//! body parsing, request logging, authorization.

use crate::error::BridgeError;
use crate::publish::{is_zero, QueryParams};
use crate::rest_server::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Query, Request, State};
use http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// The decoded request body. An empty object when the request carried no JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload(pub Value);

impl Default for RequestPayload {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl RequestPayload {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Top-level fields; a JSON array body has none.
    pub fn into_fields(self) -> Map<String, Value> {
        match self.0 {
            Value::Object(fields) => fields,
            _ => Map::new(),
        }
    }
}

/// Buffers the body, decodes JSON bodies and attaches the result as a
/// [`RequestPayload`] extension for the later stages.
pub async fn parse_body(req: Request, next: Next) -> Result<Response, BridgeError> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.map_err(body_read_error)?;

    let payload = if is_json(&parts.headers) && !bytes.is_empty() {
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidBody(e.to_string()))?;
        if !(value.is_object() || value.is_array()) {
            return Err(BridgeError::InvalidBody(
                "expected a JSON object or array".to_string(),
            ));
        }
        RequestPayload(value)
    } else {
        RequestPayload::default()
    };

    parts.extensions.insert(payload);
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

fn body_read_error(err: axum::Error) -> BridgeError {
    // The limit error arrives wrapped once per body layer.
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if current.is::<http_body_util::LengthLimitError>() {
            return BridgeError::PayloadTooLarge;
        }
        source = current.source();
    }

    BridgeError::InvalidBody(err.to_string())
}

fn is_json(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

pub async fn log_request(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = client_address(&req);
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri().path());

    let payload = if state.config.debug {
        Some(req.extensions().get::<RequestPayload>().cloned().unwrap_or_default())
    } else {
        None
    };

    info!("{}", request_log_line(url, &origin, payload.as_ref()));
    next.run(req).await
}

/// Prefers the forwarded-for header over the peer address.
fn client_address(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        return forwarded.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_log_line(url: &str, origin: &str, payload: Option<&RequestPayload>) -> String {
    let mut line = format!("Received request [{}] from [{}]", url, origin);
    match payload {
        Some(payload) => line.push_str(&format!(" with payload [{}]", payload.0)),
        None => line.push('.'),
    }
    line
}

pub async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    req: Request,
    next: Next,
) -> Response {
    let body_key = req.extensions().get::<RequestPayload>().and_then(key_field);
    let supplied = body_key.or_else(|| query.get("key").filter(|key| !key.is_empty()).cloned());

    if is_authorized(&state.config.auth_key, supplied.as_deref()) {
        next.run(req).await
    } else {
        warn!("Request is not authorized.");
        BridgeError::Unauthorized.into_response()
    }
}

/// The body `key` field, when it holds something usable as a key.
fn key_field(payload: &RequestPayload) -> Option<String> {
    match payload.field("key")? {
        Value::String(key) if !key.is_empty() => Some(key.clone()),
        Value::Number(number) if !is_zero(number) => Some(number.to_string()),
        _ => None,
    }
}

/// An empty secret disables authorization.
pub fn is_authorized(secret: &str, supplied: Option<&str>) -> bool {
    if secret.is_empty() {
        return true;
    }

    match supplied {
        Some(key) => key.as_bytes().ct_eq(secret.as_bytes()).into(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_secret_always_authorizes() {
        assert!(is_authorized("", None));
        assert!(is_authorized("", Some("anything")));
    }

    #[test]
    fn secret_requires_exact_key() {
        assert!(is_authorized("s3cret", Some("s3cret")));
        assert!(!is_authorized("s3cret", Some("s3cre")));
        assert!(!is_authorized("s3cret", Some("S3CRET")));
        assert!(!is_authorized("s3cret", None));
    }

    #[test]
    fn body_key_accepts_strings_and_numbers() {
        let payload = RequestPayload(json!({"key": "abc"}));
        assert_eq!(key_field(&payload).as_deref(), Some("abc"));

        let payload = RequestPayload(json!({"key": 1234}));
        assert_eq!(key_field(&payload).as_deref(), Some("1234"));

        let payload = RequestPayload(json!({"key": ""}));
        assert_eq!(key_field(&payload), None);

        let payload = RequestPayload(json!({"key": 0}));
        assert_eq!(key_field(&payload), None);

        let payload = RequestPayload(json!(["key"]));
        assert_eq!(key_field(&payload), None);
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 40123)))
    }

    #[test]
    fn forwarded_for_header_wins_over_peer_address() {
        let mut req = Request::builder()
            .uri("/post/a")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(peer());

        assert_eq!(client_address(&req), "203.0.113.7, 10.0.0.1");
    }

    #[test]
    fn peer_address_used_without_forwarded_for() {
        let mut req = Request::builder().uri("/post/a").body(Body::empty()).unwrap();
        req.extensions_mut().insert(peer());

        assert_eq!(client_address(&req), "10.0.0.2");
    }

    #[test]
    fn unknown_address_without_connection_info() {
        let req = Request::builder().uri("/post/a").body(Body::empty()).unwrap();
        assert_eq!(client_address(&req), "unknown");
    }

    #[test]
    fn log_line_without_debug_ends_with_period() {
        assert_eq!(
            request_log_line("/post/a?message=hi", "10.0.0.1", None),
            "Received request [/post/a?message=hi] from [10.0.0.1]."
        );
    }

    #[test]
    fn log_line_with_debug_includes_payload() {
        let payload = RequestPayload(json!({"topic": "x"}));
        assert_eq!(
            request_log_line("/post/", "10.0.0.1", Some(&payload)),
            r#"Received request [/post/] from [10.0.0.1] with payload [{"topic":"x"}]"#
        );
    }

    #[test]
    fn json_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "application/vnd.api+json".parse().unwrap());
        assert!(is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
    }
}
