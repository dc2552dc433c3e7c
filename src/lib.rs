//! HTTP to MQTT bridge.
//!
//! Plain HTTP clients publish with `GET /post/<topic>` or `POST /post/` and
//! receive a topic's messages as a long-lived streaming response from
//! `GET /subscribe/?topic=...`.

pub mod broker;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod mqtt_service;
pub mod publish;
pub mod rest_server;
pub mod service_utils;
pub mod subscription;

pub use broker::{Broker, BrokerConnection, ConnectionHandle};
pub use config::Config;
pub use error::BridgeError;
pub use models::{ConnectionEvent, IncomingMessage, PublishIntent};
pub use rest_server::{create_router, AppState};
