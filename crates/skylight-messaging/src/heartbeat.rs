use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skylight_bus::MessagingTransport;
use uuid::Uuid;

use crate::WatchdogResult;

pub const HEARTBEAT_TOPIC_PREFIX: &str = "skylight/heartbeat";

/// Reserved topic an integration addresses its own heartbeats to.
pub fn heartbeat_topic(integration_id: &str) -> String {
    format!("{HEARTBEAT_TOPIC_PREFIX}/{integration_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub from: String,
    pub to: String,
    pub nonce: Uuid,
    pub sent_at: SystemTime,
}

impl Heartbeat {
    pub fn addressed_to_self(integration_id: &str) -> Self {
        Self {
            from: integration_id.to_string(),
            to: integration_id.to_string(),
            nonce: Uuid::new_v4(),
            sent_at: SystemTime::now(),
        }
    }

    pub fn is_self_addressed(&self, integration_id: &str) -> bool {
        self.from == integration_id && self.to == integration_id
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum Envelope {
    Heartbeat(Heartbeat),
}

pub fn encode_heartbeat(heartbeat: &Heartbeat) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&Envelope::Heartbeat(heartbeat.clone()))
}

/// Returns `None` for anything that is not a heartbeat envelope.
pub fn decode_heartbeat(payload: &[u8]) -> Option<Heartbeat> {
    match serde_json::from_slice::<Envelope>(payload) {
        Ok(Envelope::Heartbeat(heartbeat)) => Some(heartbeat),
        Err(_) => None,
    }
}

pub struct HeartbeatPublisher<T: MessagingTransport + ?Sized> {
    transport: Arc<T>,
    integration_id: String,
    topic: String,
}

impl<T: MessagingTransport + ?Sized> HeartbeatPublisher<T> {
    pub fn new(transport: Arc<T>, integration_id: impl Into<String>) -> Self {
        let integration_id = integration_id.into();
        let topic = heartbeat_topic(&integration_id);
        Self {
            transport,
            integration_id,
            topic,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn integration_id(&self) -> &str {
        &self.integration_id
    }

    pub async fn publish(&self) -> WatchdogResult<Heartbeat> {
        let heartbeat = Heartbeat::addressed_to_self(&self.integration_id);
        let envelope = encode_heartbeat(&heartbeat)?;
        self.transport
            .publish(&self.topic, Bytes::from(envelope))
            .await?;
        Ok(heartbeat)
    }
}

impl<T: MessagingTransport + ?Sized> Clone for HeartbeatPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            integration_id: self.integration_id.clone(),
            topic: self.topic.clone(),
        }
    }
}
