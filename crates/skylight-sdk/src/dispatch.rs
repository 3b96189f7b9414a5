use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{SdkError, SdkResult};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Issues independent remote calls concurrently and waits for all of them.
///
/// Only leaf calls made through [`RequestDispatcher::call`] take a slot, so
/// branches that themselves dispatch nested calls never starve each other.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    permits: Arc<Semaphore>,
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl RequestDispatcher {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Runs one remote call once a slot is free.
    pub async fn call<F, T>(&self, request: F) -> SdkResult<T>
    where
        F: Future<Output = SdkResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SdkError::DispatcherClosed)?;
        request.await
    }

    /// Drives every branch to completion. A failing branch never cancels its
    /// siblings; one failure is returned as-is, several as a batch.
    pub async fn join_all<I, F>(&self, branches: I) -> SdkResult<()>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = SdkResult<()>>,
    {
        let mut failures: Vec<SdkError> = join_all(branches)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for err in &failures {
            warn!(target = "skylight.dispatch", error = %err, "sub-request failed");
        }
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(SdkError::Batch(failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failure(code: u16) -> SdkError {
        SdkError::UnexpectedStatus {
            status: reqwest::StatusCode::from_u16(code).expect("status"),
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn all_successes_complete() {
        let dispatcher = RequestDispatcher::default();
        let done = AtomicUsize::new(0);
        let branches = (0..5).map(|_| async {
            dispatcher
                .call(async {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });
        dispatcher.join_all(branches).await.expect("all ok");
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let dispatcher = RequestDispatcher::default();
        let done = AtomicUsize::new(0);
        let branches = (0..4u16).map(|i| {
            let done = &done;
            async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(failure(500))
                } else {
                    Ok(())
                }
            }
        });
        let err = dispatcher.join_all(branches).await.expect_err("one failure");
        assert!(matches!(err, SdkError::UnexpectedStatus { .. }));
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn several_failures_are_batched() {
        let dispatcher = RequestDispatcher::default();
        let branches = [500u16, 200, 502]
            .into_iter()
            .map(|code| async move { if code >= 500 { Err(failure(code)) } else { Ok(()) } });
        match dispatcher.join_all(branches).await {
            Err(SdkError::Batch(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_are_bounded() {
        let dispatcher = RequestDispatcher::new(2);
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let branches = (0..6).map(|_| async {
            dispatcher
                .call(async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });
        dispatcher.join_all(branches).await.expect("all ok");
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
