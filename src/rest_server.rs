use crate::broker::Broker;
use crate::config::Config;
use crate::error::BridgeError;
use crate::middleware::{authorize, log_request, parse_body, RequestPayload};
use crate::models::PublishIntent;
use crate::publish::{intent_from_body, intent_from_get, normalize_body, QueryParams};
use crate::subscription::session_stream;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info};

const MAX_BODY_BYTES: usize = 100 * 1024;

/// Everything a handler needs, passed explicitly to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<dyn Broker>,
    /// Flips to true once the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/post", post(publish_from_body))
        .route("/post/", get(publish_from_path).post(publish_from_body))
        .route("/post/{*topic}", get(publish_from_path))
        .route("/subscribe", get(subscribe))
        .route("/subscribe/", get(subscribe))
        .layer(from_fn_with_state(state.clone(), authorize))
        .layer(from_fn_with_state(state.clone(), log_request))
        .layer(from_fn(parse_body))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Issues the publish and answers immediately; broker acknowledgment is never
/// awaited and failures are only logged.
fn publish(state: &AppState, intent: PublishIntent) -> (StatusCode, &'static str) {
    debug!(
        "Publishing to '{}' (qos {}, retain {})",
        intent.topic, intent.qos, intent.retain
    );
    state.broker.publish(intent);
    (StatusCode::OK, "OK")
}

/// GET /post/{*topic}
///
/// The topic is taken from the raw request path, so it is never rejected for
/// its encoding.
async fn publish_from_path(
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<QueryParams>,
) -> (StatusCode, &'static str) {
    publish(&state, intent_from_get(uri.path(), &query))
}

/// POST /post/
async fn publish_from_body(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    Extension(payload): Extension<RequestPayload>,
) -> Result<(StatusCode, &'static str), BridgeError> {
    let mut fields = payload.into_fields();
    normalize_body(&mut fields, &query);
    let intent = intent_from_body(&fields)?;
    Ok(publish(&state, intent))
}

/// GET /subscribe/?topic=...
///
/// Streams raw payloads for as long as the client keeps the request open.
async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
) -> Result<Response, BridgeError> {
    let topic = query
        .get("topic")
        .filter(|topic| !topic.is_empty())
        .cloned()
        .ok_or(BridgeError::SubscribeTopicNotSpecified)?;

    info!("Opening subscription to '{}'", topic);
    let connection = state.broker.open_connection();
    let stream = session_stream(topic, connection, state.shutdown.clone());

    Ok(Response::new(Body::from_stream(stream)))
}

/// Serves the bridge until `shutdown` resolves.
pub async fn run_rest_server<F>(state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.config.http_port;
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    info!("HTTP bridge is running on port {}", port);

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
