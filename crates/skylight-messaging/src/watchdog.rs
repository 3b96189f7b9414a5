use std::sync::Arc;
use std::time::Duration;

use skylight_bus::{BusEvent, MessagingTransport};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::heartbeat::{decode_heartbeat, HeartbeatPublisher};
use crate::{
    WatchdogError, WatchdogEvent, WatchdogResult, HEARTBEAT_INTERVAL, MIN_HEARTBEAT_INTERVAL,
};

struct Armed {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Verifies that the messaging connection still delivers traffic by sending
/// heartbeats to itself, and cycles the connection when one goes missing.
///
/// Armed while a supervising task is running; Stopped otherwise. The heartbeat
/// flag lives inside that task, so the receive path and the timer tick never
/// touch it concurrently.
pub struct ConnectionWatchdog<T: MessagingTransport + 'static> {
    transport: Arc<T>,
    publisher: HeartbeatPublisher<T>,
    interval: Duration,
    events: broadcast::Sender<WatchdogEvent>,
    armed: Mutex<Option<Armed>>,
}

impl<T: MessagingTransport + 'static> ConnectionWatchdog<T> {
    pub fn new(transport: Arc<T>, integration_id: impl Into<String>) -> Self {
        let publisher = HeartbeatPublisher::new(Arc::clone(&transport), integration_id);
        Self {
            transport,
            publisher,
            interval: HEARTBEAT_INTERVAL,
            events: broadcast::channel(32).0,
            armed: Mutex::new(None),
        }
    }

    /// Intervals shorter than [`MIN_HEARTBEAT_INTERVAL`] are raised to it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    pub async fn is_armed(&self) -> bool {
        self.armed.lock().await.is_some()
    }

    /// Connects, subscribes to the heartbeat topic, sends the first heartbeat
    /// and starts ticking.
    pub async fn start(&self) -> WatchdogResult<()> {
        let mut armed = self.armed.lock().await;
        if armed.is_some() {
            return Err(WatchdogError::AlreadyArmed);
        }

        // Listen before connecting so the first heartbeat cannot slip past.
        let bus_events = self.transport.events();
        let first_nonce = match establish(self.transport.as_ref(), &self.publisher).await {
            Ok(nonce) => nonce,
            Err(err) => {
                if let Err(cleanup) = self.transport.disconnect().await {
                    warn!(target = "skylight.watchdog", error = %cleanup, "disconnect after failed start failed");
                }
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            transport: Arc::clone(&self.transport),
            publisher: self.publisher.clone(),
            interval: self.interval,
            events: self.events.clone(),
        };
        let task = tokio::spawn(supervisor.run(bus_events, first_nonce, cancel.clone()));
        *armed = Some(Armed { cancel, task });

        info!(
            target = "skylight.watchdog",
            topic = self.publisher.topic(),
            interval_ms = self.interval.as_millis() as u64,
            "connection watchdog armed"
        );
        let _ = self.events.send(WatchdogEvent::Armed);
        Ok(())
    }

    /// Cancels the timer, drops the heartbeat state and closes the connection.
    /// Stopping a stopped watchdog is a no-op.
    ///
    /// The lifecycle lock is held until the connection is closed, so a
    /// concurrent `start` waits for the stop to finish.
    pub async fn stop(&self) -> WatchdogResult<()> {
        let mut guard = self.armed.lock().await;
        let Some(armed) = guard.take() else {
            return Ok(());
        };
        armed.cancel.cancel();
        if let Err(err) = armed.task.await {
            warn!(target = "skylight.watchdog", error = %err, "watchdog task ended abnormally");
        }
        self.transport.disconnect().await?;

        info!(target = "skylight.watchdog", "connection watchdog stopped");
        let _ = self.events.send(WatchdogEvent::Stopped);
        drop(guard);
        Ok(())
    }
}

impl<T: MessagingTransport + 'static> Drop for ConnectionWatchdog<T> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.armed.try_lock() {
            if let Some(armed) = guard.take() {
                armed.cancel.cancel();
                armed.task.abort();
            }
        }
    }
}

/// Returns the nonce of the heartbeat sent on the fresh connection.
async fn establish<T: MessagingTransport + ?Sized>(
    transport: &T,
    publisher: &HeartbeatPublisher<T>,
) -> WatchdogResult<Uuid> {
    transport.connect().await?;
    transport.subscribe(publisher.topic()).await?;
    Ok(publisher.publish().await?.nonce)
}

struct Supervisor<T: MessagingTransport + 'static> {
    transport: Arc<T>,
    publisher: HeartbeatPublisher<T>,
    interval: Duration,
    events: broadcast::Sender<WatchdogEvent>,
}

impl<T: MessagingTransport + 'static> Supervisor<T> {
    async fn run(
        self,
        mut bus_events: broadcast::Receiver<BusEvent>,
        first_nonce: Uuid,
        cancel: CancellationToken,
    ) {
        // Set by the receive path, read and reset by the tick.
        let mut heartbeat_seen = false;
        // Only the latest heartbeat counts; echoes of earlier ones are stale.
        let mut awaited: Option<Uuid> = Some(first_nonce);
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if heartbeat_seen {
                        heartbeat_seen = false;
                        awaited = match self.publisher.publish().await {
                            Ok(heartbeat) => Some(heartbeat.nonce),
                            Err(err) => {
                                warn!(target = "skylight.watchdog", error = %err, "failed to publish heartbeat");
                                None
                            }
                        };
                    } else {
                        awaited = self.reconnect().await;
                    }
                }
                event = bus_events.recv() => match event {
                    Ok(BusEvent::Message(msg)) if msg.topic == self.publisher.topic() => {
                        let Some(heartbeat) = decode_heartbeat(&msg.payload) else {
                            continue;
                        };
                        if !heartbeat.is_self_addressed(self.publisher.integration_id()) {
                            debug!(target = "skylight.watchdog", from = %heartbeat.from, "ignoring foreign heartbeat");
                            continue;
                        }
                        if awaited != Some(heartbeat.nonce) {
                            debug!(target = "skylight.watchdog", nonce = %heartbeat.nonce, "ignoring stale heartbeat");
                            continue;
                        }
                        if !heartbeat_seen {
                            heartbeat_seen = true;
                            let _ = self.events.send(WatchdogEvent::HeartbeatConfirmed);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target = "skylight.watchdog", skipped, "watchdog lagged behind bus events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!(target = "skylight.watchdog", "messaging event stream closed; watchdog exiting");
                        break;
                    }
                }
            }
        }
    }

    /// One full stop/start cycle. A failure is reported and left for the next
    /// tick to retry. Returns the nonce of the heartbeat now in flight.
    async fn reconnect(&self) -> Option<Uuid> {
        warn!(
            target = "skylight.watchdog",
            topic = self.publisher.topic(),
            "no heartbeat observed within interval; reconnecting"
        );
        if let Err(err) = self.transport.disconnect().await {
            warn!(target = "skylight.watchdog", error = %err, "disconnect before reconnect failed");
        }
        match establish(self.transport.as_ref(), &self.publisher).await {
            Ok(nonce) => {
                info!(target = "skylight.watchdog", "messaging connection re-established");
                let _ = self.events.send(WatchdogEvent::Reconnected);
                Some(nonce)
            }
            Err(err) => {
                error!(target = "skylight.watchdog", error = %err, "reconnect failed; retrying next tick");
                let _ = self.events.send(WatchdogEvent::ReconnectFailed {
                    error: err.to_string(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::{encode_heartbeat, Heartbeat};
    use async_trait::async_trait;
    use bytes::Bytes;
    use skylight_bus::{BusResult, LocalBroker};
    use tokio::time::sleep;

    const TICK: Duration = Duration::from_secs(5);

    fn watchdog(broker: &Arc<LocalBroker>) -> ConnectionWatchdog<LocalBroker> {
        ConnectionWatchdog::new(broker.clone(), "integration-1").with_interval(TICK)
    }

    /// Loopback broker whose `disconnect` takes a while to complete.
    struct SlowDisconnect {
        inner: LocalBroker,
    }

    #[async_trait]
    impl MessagingTransport for SlowDisconnect {
        async fn connect(&self) -> BusResult<()> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> BusResult<()> {
            sleep(Duration::from_millis(20)).await;
            self.inner.disconnect().await
        }

        async fn subscribe(&self, topic_filter: &str) -> BusResult<()> {
            self.inner.subscribe(topic_filter).await
        }

        async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
            self.inner.publish(topic, payload).await
        }

        fn events(&self) -> broadcast::Receiver<BusEvent> {
            self.inner.events()
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<WatchdogEvent>) -> Vec<WatchdogEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn observed_heartbeats_never_trigger_reconnect() {
        let broker = Arc::new(LocalBroker::new());
        let watchdog = watchdog(&broker);
        watchdog.start().await.expect("start");

        sleep(TICK * 5 + Duration::from_secs(1)).await;

        let stats = broker.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, 0);
        // Initial heartbeat plus one per tick.
        assert_eq!(stats.published, 6);
        assert_eq!(stats.delivered, 6);
        assert!(watchdog.is_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeat_cycles_connection_once() {
        let broker = Arc::new(LocalBroker::new());
        broker.drop_next(1);
        let watchdog = watchdog(&broker);
        let mut events = watchdog.subscribe_events();
        watchdog.start().await.expect("start");

        sleep(TICK + Duration::from_secs(1)).await;
        let stats = broker.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);

        sleep(TICK * 3).await;
        let stats = broker.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);

        let seen = drain(&mut events);
        let reconnects = seen
            .iter()
            .filter(|e| **e == WatchdogEvent::Reconnected)
            .count();
        assert_eq!(reconnects, 1);
        assert_eq!(seen.first(), Some(&WatchdogEvent::Armed));
        assert!(seen.contains(&WatchdogEvent::HeartbeatConfirmed));
    }

    #[tokio::test(start_paused = true)]
    async fn severed_broker_is_detected_on_following_tick() {
        let broker = Arc::new(LocalBroker::new());
        let watchdog = watchdog(&broker);
        watchdog.start().await.expect("start");

        sleep(Duration::from_secs(1)).await;
        broker.sever();

        // Tick 1 still holds the heartbeat from tick 0; tick 2 finds nothing.
        sleep(TICK).await;
        assert_eq!(broker.stats().connects, 1);
        sleep(TICK).await;
        assert_eq!(broker.stats().connects, 2);

        sleep(TICK * 4).await;
        let stats = broker.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_is_retried_on_next_tick() {
        let broker = Arc::new(LocalBroker::new());
        broker.drop_next(1);
        let watchdog = watchdog(&broker);
        let mut events = watchdog.subscribe_events();
        watchdog.start().await.expect("start");
        broker.fail_next_connects(1);

        sleep(TICK + Duration::from_secs(1)).await;
        let stats = broker.stats();
        assert_eq!(stats.failed_connects, 1);
        assert_eq!(stats.connects, 1);
        assert!(!broker.is_connected());

        sleep(TICK).await;
        let stats = broker.stats();
        assert_eq!(stats.connects, 2);
        assert!(broker.is_connected());

        let seen = drain(&mut events);
        let failed_at = seen
            .iter()
            .position(|e| matches!(e, WatchdogEvent::ReconnectFailed { .. }))
            .expect("reconnect failure reported");
        let recovered_at = seen
            .iter()
            .position(|e| *e == WatchdogEvent::Reconnected)
            .expect("reconnect reported");
        assert!(failed_at < recovered_at);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_heartbeats_do_not_count() {
        let broker = Arc::new(LocalBroker::new());
        broker.drop_next(1);
        let watchdog = watchdog(&broker);
        watchdog.start().await.expect("start");

        let mut foreign = Heartbeat::addressed_to_self("integration-1");
        foreign.from = "integration-2".into();
        let payload = encode_heartbeat(&foreign).expect("encode");
        broker
            .publish("skylight/heartbeat/integration-1", Bytes::from(payload))
            .await
            .expect("publish foreign heartbeat");

        sleep(TICK + Duration::from_secs(1)).await;
        assert_eq!(broker.stats().connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeats_do_not_count() {
        let broker = Arc::new(LocalBroker::new());
        broker.drop_next(1);
        let watchdog = watchdog(&broker);
        watchdog.start().await.expect("start");

        // Self-addressed but not the heartbeat the watchdog is waiting for.
        let stale = Heartbeat::addressed_to_self("integration-1");
        let payload = encode_heartbeat(&stale).expect("encode");
        broker
            .publish("skylight/heartbeat/integration-1", Bytes::from(payload))
            .await
            .expect("publish stale heartbeat");

        sleep(TICK + Duration::from_secs(1)).await;
        let stats = broker.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_minimum() {
        let broker = Arc::new(LocalBroker::new());
        let watchdog = ConnectionWatchdog::new(broker.clone(), "integration-1")
            .with_interval(Duration::ZERO);
        assert_eq!(watchdog.interval(), MIN_HEARTBEAT_INTERVAL);

        watchdog.start().await.expect("start");
        sleep(MIN_HEARTBEAT_INTERVAL * 5 + MIN_HEARTBEAT_INTERVAL / 2).await;
        assert!(watchdog.is_armed().await);
        let stats = broker.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.published, 6);
        watchdog.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_pending_stop() {
        let transport = Arc::new(SlowDisconnect {
            inner: LocalBroker::new(),
        });
        let watchdog = Arc::new(
            ConnectionWatchdog::new(transport.clone(), "integration-1").with_interval(TICK),
        );
        let mut events = watchdog.subscribe_events();
        watchdog.start().await.expect("start");

        let stopper = Arc::clone(&watchdog);
        let stopping = tokio::spawn(async move { stopper.stop().await });
        sleep(Duration::from_millis(5)).await;
        watchdog.start().await.expect("restart");
        stopping.await.expect("stop task").expect("stop");

        assert!(watchdog.is_armed().await);
        assert!(transport.is_connected());
        let stats = transport.inner.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);
        let lifecycle: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| *e != WatchdogEvent::HeartbeatConfirmed)
            .collect();
        assert_eq!(
            lifecycle,
            vec![WatchdogEvent::Armed, WatchdogEvent::Stopped, WatchdogEvent::Armed]
        );
        watchdog.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disconnects_and_halts_ticks() {
        let broker = Arc::new(LocalBroker::new());
        let watchdog = watchdog(&broker);
        let mut events = watchdog.subscribe_events();
        watchdog.start().await.expect("start");
        watchdog.stop().await.expect("stop");

        assert!(!watchdog.is_armed().await);
        assert!(!broker.is_connected());
        sleep(TICK * 3).await;
        let stats = broker.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(drain(&mut events).last(), Some(&WatchdogEvent::Stopped));

        watchdog.start().await.expect("restart");
        assert_eq!(broker.stats().connects, 2);
        watchdog.stop().await.expect("stop again");
        watchdog.stop().await.expect("stop is idempotent");
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let broker = Arc::new(LocalBroker::new());
        let watchdog = watchdog(&broker);
        watchdog.start().await.expect("start");
        let err = watchdog.start().await.expect_err("second start");
        assert!(matches!(err, WatchdogError::AlreadyArmed));
        assert_eq!(broker.stats().connects, 1);
        watchdog.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn failed_start_leaves_watchdog_stopped() {
        let broker = Arc::new(LocalBroker::new());
        broker.fail_next_connects(1);
        let watchdog = watchdog(&broker);
        let err = watchdog.start().await.expect_err("connect refused");
        assert!(matches!(err, WatchdogError::Bus(_)));
        assert!(!watchdog.is_armed().await);
        assert!(!broker.is_connected());
    }
}
