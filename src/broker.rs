//! The broker capability the bridge is built on.
//!
//! Publishing goes through one long-lived connection shared by every request.
//! Each subscribe request opens its own connection through
//! [`Broker::open_connection`] and owns it until the HTTP request ends.

use crate::models::{ConnectionEvent, PublishIntent};
use tokio::sync::mpsc;

pub trait Broker: Send + Sync {
    /// Issues a publish on the shared connection. Fire-and-forget: failures are
    /// logged by the implementation and never reported back.
    fn publish(&self, intent: PublishIntent);

    /// Opens a new connection that is not shared with any other caller.
    fn open_connection(&self) -> BrokerConnection;
}

/// Control side of a dedicated connection.
pub trait ConnectionHandle: Send + Sync {
    fn subscribe(&self, topic: &str);

    /// Ends the connection. Callers guarantee this runs at most once.
    fn close(&self);
}

/// A freshly opened dedicated connection: its event feed plus its control handle.
pub struct BrokerConnection {
    pub events: mpsc::Receiver<ConnectionEvent>,
    pub handle: Box<dyn ConnectionHandle>,
}

impl BrokerConnection {
    pub fn new(events: mpsc::Receiver<ConnectionEvent>, handle: Box<dyn ConnectionHandle>) -> Self {
        Self { events, handle }
    }
}
