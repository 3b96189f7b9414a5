//! Skylight messaging: keeps the push-messaging connection honest.
//!
//! Responsibilities:
//! - publishing self-addressed heartbeats on a reserved per-integration topic
//! - watching for those heartbeats to come back and reconnecting when a broker
//!   silently stops delivering
//! - reporting liveness transitions to interested callers

use std::time::Duration;

use skylight_bus::BusError;
use thiserror::Error;

pub mod heartbeat;
pub mod watchdog;

pub use heartbeat::{heartbeat_topic, Heartbeat, HeartbeatPublisher, HEARTBEAT_TOPIC_PREFIX};
pub use watchdog::ConnectionWatchdog;

/// Time between watchdog ticks. A heartbeat published at one tick must be
/// observed before the next.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Floor applied to configured watchdog intervals.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog is already armed")]
    AlreadyArmed,
    #[error("messaging transport error: {0}")]
    Bus(#[from] BusError),
    #[error("failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type WatchdogResult<T> = Result<T, WatchdogError>;

/// Liveness transitions reported by [`ConnectionWatchdog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    Armed,
    HeartbeatConfirmed,
    Reconnected,
    ReconnectFailed { error: String },
    Stopped,
}
