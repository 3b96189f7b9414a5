use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

mod local;
mod topic;

pub use local::{BrokerStats, LocalBroker};
pub use topic::topic_matches;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Everything the messaging connection reports, delivered through one typed
/// channel so the watchdog and any other listener see the same stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Subscribed { topic: String },
    Message(BusMessage),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("messaging connection is not established")]
    NotConnected,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Publish/subscribe connection to the message broker.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn connect(&self) -> BusResult<()>;

    /// Closing an already closed connection is not an error.
    async fn disconnect(&self) -> BusResult<()>;

    /// Subscribes to an MQTT-style topic filter (`+` and `#` wildcards).
    /// Subscriptions do not survive a reconnect.
    async fn subscribe(&self, topic_filter: &str) -> BusResult<()>;

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;

    fn events(&self) -> broadcast::Receiver<BusEvent>;

    fn is_connected(&self) -> bool;
}
