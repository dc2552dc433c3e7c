use bytes::Bytes;

/// One publish derived from a single HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Raw quality-of-service level; only the broker layer validates it.
    pub qos: i64,
    pub retain: bool,
}

impl PublishIntent {
    /// Publish with the broker defaults (qos 0, not retained).
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: 0,
            retain: false,
        }
    }

    pub fn with_options(mut self, qos: i64, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Events delivered by a dedicated broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The broker acknowledged the connection. Fires again after every reconnect.
    Connected,
    Message(IncomingMessage),
}
