use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{topic_matches, BusError, BusEvent, BusMessage, BusResult, MessagingTransport};

/// Counters describing everything the broker has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connects: usize,
    pub failed_connects: usize,
    pub disconnects: usize,
    pub published: usize,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    severed: bool,
    filters: Vec<String>,
    drop_next: usize,
    fail_next_connects: usize,
    stats: BrokerStats,
}

/// In-process loopback broker for tests and offline tooling. Publishes are
/// echoed back to this connection's own subscriptions.
///
/// Faults can be injected to mimic a broker that silently stops delivering
/// (`sever`, `drop_next`) or refuses connections (`fail_next_connects`).
#[derive(Debug)]
pub struct LocalBroker {
    events: broadcast::Sender<BusEvent>,
    state: Mutex<BrokerState>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            events: broadcast::channel(64).0,
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Keeps the connection nominally open but stops delivering anything
    /// until the next successful `connect`.
    pub fn sever(&self) {
        self.state.lock().severed = true;
    }

    /// Silently discards the next `count` publishes.
    pub fn drop_next(&self, count: usize) {
        self.state.lock().drop_next += count;
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_next_connects += count;
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().filters.clone()
    }

    fn emit(&self, event: BusEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MessagingTransport for LocalBroker {
    async fn connect(&self) -> BusResult<()> {
        {
            let mut state = self.state.lock();
            if state.fail_next_connects > 0 {
                state.fail_next_connects -= 1;
                state.stats.failed_connects += 1;
                return Err(BusError::Transport("connection refused".into()));
            }
            state.connected = true;
            state.severed = false;
            state.filters.clear();
            state.stats.connects += 1;
        }
        debug!(target = "skylight.bus", "local broker connected");
        self.emit(BusEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> BusResult<()> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
            state.filters.clear();
            state.stats.disconnects += 1;
        }
        debug!(target = "skylight.bus", "local broker disconnected");
        self.emit(BusEvent::Disconnected { reason: None });
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> BusResult<()> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(BusError::NotConnected);
            }
            if !state.filters.iter().any(|f| f == topic_filter) {
                state.filters.push(topic_filter.to_string());
            }
        }
        self.emit(BusEvent::Subscribed {
            topic: topic_filter.to_string(),
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        let deliver = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(BusError::NotConnected);
            }
            state.stats.published += 1;
            if state.drop_next > 0 {
                state.drop_next -= 1;
                state.stats.dropped += 1;
                false
            } else if state.severed {
                state.stats.dropped += 1;
                false
            } else if state.filters.iter().any(|f| topic_matches(f, topic)) {
                state.stats.delivered += 1;
                true
            } else {
                false
            }
        };
        if deliver {
            self.emit(BusEvent::Message(BusMessage {
                topic: topic.to_string(),
                payload,
            }));
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
