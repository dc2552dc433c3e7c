use http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures that end an HTTP request before any broker interaction.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Topic not specified")]
    TopicNotSpecified,
    #[error("topic not specified")]
    SubscribeTopicNotSpecified,
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Request body too large")]
    PayloadTooLarge,
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TopicNotSpecified | Self::SubscribeTopicNotSpecified => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
