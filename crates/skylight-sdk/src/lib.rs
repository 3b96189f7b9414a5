//! Asynchronous client for the Skylight assignments API.
//!
//! Assignments larger than the payload budget are split into a shell plus
//! sequence and card requests that each fit, and sent concurrently. The
//! [`Manager`] ties the REST side to a messaging transport kept alive by a
//! heartbeat watchdog.

pub mod api;
pub mod cards;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod estimate;
pub mod grouping;
pub mod manager;
pub mod plan;
pub mod splitter;

pub use api::{ApiCall, AssignmentApi, InMemoryAssignmentApi};
pub use cards::CardBatchSplitter;
pub use client::ApiClient;
pub use config::{
    ClientSettings, ConfigError, Credentials, MqttConnectionType, DEFAULT_CREDENTIALS_PATH,
};
pub use dispatch::{RequestDispatcher, DEFAULT_MAX_IN_FLIGHT};
pub use error::{SdkError, SdkResult, SplitError};
pub use estimate::{
    PayloadBudget, PayloadSizeEstimator, DEFAULT_BYTES_PER_CHAR, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use grouping::SequenceGrouper;
pub use manager::Manager;
pub use plan::{OverflowSequence, SplitPlan, SubmissionPlan};
pub use splitter::AssignmentSplitter;
