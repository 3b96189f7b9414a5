use skylight_messaging::WatchdogError;
use thiserror::Error;

use crate::config::ConfigError;

/// Raised while planning a submission, before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error(
        "card {card_id} in sequence {sequence_id} is {size} bytes on its own, \
         which does not fit the {budget} byte payload budget"
    )]
    UnsplittableCard {
        sequence_id: String,
        card_id: String,
        size: usize,
        budget: usize,
    },
    #[error("{kind} shell {id} is {size} bytes, which does not fit the {budget} byte payload budget")]
    OversizedShell {
        kind: &'static str,
        id: String,
        size: usize,
        budget: usize,
    },
}

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid api url: {0}")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("messaging error: {0}")]
    Messaging(#[from] WatchdogError),
    #[error("request dispatcher closed")]
    DispatcherClosed,
    /// Several concurrent sub-requests failed. Siblings that succeeded are
    /// not rolled back.
    #[error("{} sub-requests failed", .0.len())]
    Batch(Vec<SdkError>),
}

impl SdkError {
    /// Every leaf failure, with batches flattened.
    pub fn failures(&self) -> Vec<&SdkError> {
        match self {
            SdkError::Batch(errors) => errors.iter().flat_map(SdkError::failures).collect(),
            other => vec![other],
        }
    }

    /// True when a single card exceeds the payload budget on its own.
    pub fn is_unsplittable(&self) -> bool {
        matches!(self, SdkError::Split(SplitError::UnsplittableCard { .. }))
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
