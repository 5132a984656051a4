//! Waits for long-running operations to finish.
//!
//! The poller queries an operation at a fixed interval until it reaches a
//! terminal status. `DONE` without an error is the only success. `ABORTING`,
//! and `DONE` with an error attached, are failures. Anything else, including
//! statuses this crate does not know, keeps the loop going until the optional
//! attempt cap, deadline or cancellation token stops it.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PollError;
use crate::gateway::{OperationHandle, OperationStatus, ResourceGateway};

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// How often and for how long to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status checks.
    pub interval: Duration,
    /// Give up after this many status checks.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            timeout: None,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Polls operations through a [`ResourceGateway`].
#[derive(Debug, Clone, Default)]
pub struct OperationPoller {
    config: PollConfig,
    cancel: Option<CancellationToken>,
}

impl OperationPoller {
    #[must_use]
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Stop waiting when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Same settings, ignoring the cancellation token.
    ///
    /// Cleanup after an interrupted run uses this so each delete is still
    /// awaited before the next one is sent.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::new(self.config.clone())
    }

    #[must_use]
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Whether the cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Wait for `handle` to reach a terminal status.
    ///
    /// # Errors
    /// - [`PollError::OperationFailed`] if the operation aborts or finishes with an error
    /// - [`PollError::Timeout`] if the attempt cap or deadline is reached first
    /// - [`PollError::Cancelled`] if the cancellation token fires
    /// - [`PollError::Gateway`] if a status query fails
    pub async fn await_operation<G>(
        &self,
        gateway: &G,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, PollError>
    where
        G: ResourceGateway + ?Sized,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(PollError::Cancelled {
                    operation: handle.name.clone(),
                });
            }

            attempts += 1;
            let snapshot = gateway.get_operation(handle).await?;

            debug!(
                operation = %handle,
                status = %snapshot.status,
                attempt = attempts,
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Polling operation status"
            );

            match snapshot.status {
                OperationStatus::Done => {
                    if let Some(detail) = snapshot.error {
                        return Err(PollError::OperationFailed {
                            operation: handle.name.clone(),
                            detail,
                        });
                    }
                    info!(operation = %handle, attempts, "Operation completed");
                    return Ok(OperationStatus::Done);
                }
                OperationStatus::Aborting => {
                    return Err(PollError::OperationFailed {
                        operation: handle.name.clone(),
                        detail: snapshot
                            .error
                            .unwrap_or_else(|| "operation is aborting".to_string()),
                    });
                }
                OperationStatus::Unknown(ref status) => {
                    warn!(operation = %handle, status = %status, "Unrecognised operation status, still waiting");
                }
                OperationStatus::Unspecified
                | OperationStatus::Pending
                | OperationStatus::Running => {}
            }

            let out_of_attempts = self.config.max_attempts.is_some_and(|max| attempts >= max);
            let out_of_time = self
                .config
                .timeout
                .is_some_and(|timeout| start.elapsed() >= timeout);
            if out_of_attempts || out_of_time {
                return Err(PollError::Timeout {
                    operation: handle.name.clone(),
                    attempts,
                });
            }

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => {
                            return Err(PollError::Cancelled {
                                operation: handle.name.clone(),
                            });
                        }
                        () = tokio::time::sleep(self.config.interval) => {}
                    }
                }
                None => tokio::time::sleep(self.config.interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{scopes, ClusterSpec, NetworkMode, WorkerGroupSpec};
    use crate::error::GatewayError;
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::OperationSnapshot;
    use crate::request::build_create_request;

    fn fast() -> OperationPoller {
        OperationPoller::new(PollConfig::default().with_interval(Duration::from_millis(1)))
    }

    fn statuses(list: &[OperationStatus]) -> Vec<OperationSnapshot> {
        list.iter().cloned().map(OperationSnapshot::new).collect()
    }

    async fn start_cluster(gateway: &FakeGateway) -> OperationHandle {
        let spec = ClusterSpec::new("p", "demo", "us-central1", &NetworkMode::Default)
            .with_worker(WorkerGroupSpec::fixed("e2-small", 1, scopes::default_scopes()));
        gateway
            .create_cluster(&build_create_request(&spec))
            .await
            .unwrap()
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(PollConfig::default().interval, Duration::from_millis(5000));
        assert!(PollConfig::default().max_attempts.is_none());
    }

    #[tokio::test]
    async fn test_running_running_done() {
        let gateway = FakeGateway::new();
        gateway.script_operation(
            "create_cluster",
            statuses(&[
                OperationStatus::Running,
                OperationStatus::Running,
                OperationStatus::Done,
            ]),
        );
        let handle = start_cluster(&gateway).await;

        let status = fast().await_operation(&gateway, &handle).await.unwrap();
        assert_eq!(status, OperationStatus::Done);
        assert_eq!(gateway.calls_matching("get_operation").len(), 3);
    }

    #[tokio::test]
    async fn test_running_aborting_fails_on_second_query() {
        let gateway = FakeGateway::new();
        gateway.script_operation(
            "create_cluster",
            statuses(&[
                OperationStatus::Running,
                OperationStatus::Aborting,
                OperationStatus::Done,
            ]),
        );
        let handle = start_cluster(&gateway).await;

        let err = fast().await_operation(&gateway, &handle).await.unwrap_err();
        assert!(matches!(err, PollError::OperationFailed { .. }));
        assert_eq!(gateway.calls_matching("get_operation").len(), 2);
    }

    #[tokio::test]
    async fn test_done_with_error_is_failure() {
        let gateway = FakeGateway::new();
        gateway.script_operation(
            "create_cluster",
            vec![OperationSnapshot {
                status: OperationStatus::Done,
                error: Some("insufficient regional quota".into()),
            }],
        );
        let handle = start_cluster(&gateway).await;

        match fast().await_operation(&gateway, &handle).await {
            Err(PollError::OperationFailed { detail, .. }) => {
                assert_eq!(detail, "insufficient regional quota");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_status_keeps_polling() {
        let gateway = FakeGateway::new();
        gateway.script_operation(
            "create_cluster",
            statuses(&[
                OperationStatus::Unknown("RECONCILING".into()),
                OperationStatus::Unspecified,
                OperationStatus::Pending,
                OperationStatus::Done,
            ]),
        );
        let handle = start_cluster(&gateway).await;

        assert!(fast().await_operation(&gateway, &handle).await.is_ok());
        assert_eq!(gateway.calls_matching("get_operation").len(), 4);
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let gateway = FakeGateway::new();
        gateway.script_operation("create_cluster", statuses(&[OperationStatus::Running]));
        let handle = start_cluster(&gateway).await;

        let poller = OperationPoller::new(
            PollConfig::default()
                .with_interval(Duration::from_millis(1))
                .with_max_attempts(3),
        );
        let err = poller.await_operation(&gateway, &handle).await.unwrap_err();
        assert!(matches!(err, PollError::Timeout { attempts: 3, .. }));
        assert_eq!(gateway.calls_matching("get_operation").len(), 3);
    }

    #[tokio::test]
    async fn test_deadline() {
        let gateway = FakeGateway::new();
        gateway.script_operation("create_cluster", statuses(&[OperationStatus::Running]));
        let handle = start_cluster(&gateway).await;

        let poller = OperationPoller::new(
            PollConfig::default()
                .with_interval(Duration::from_millis(1))
                .with_timeout(Duration::from_millis(20)),
        );
        let err = poller.await_operation(&gateway, &handle).await.unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let gateway = FakeGateway::new();
        gateway.script_operation("create_cluster", statuses(&[OperationStatus::Running]));
        let handle = start_cluster(&gateway).await;

        let token = CancellationToken::new();
        let poller = OperationPoller::new(
            PollConfig::default().with_interval(Duration::from_secs(60)),
        )
        .with_cancellation(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = poller.await_operation(&gateway, &handle).await.unwrap_err();
        assert!(matches!(err, PollError::Cancelled { .. }));
        assert_eq!(gateway.calls_matching("get_operation").len(), 1);
    }

    #[tokio::test]
    async fn test_detached_poller_ignores_cancelled_token() {
        let gateway = FakeGateway::new();
        let handle = start_cluster(&gateway).await;

        let token = CancellationToken::new();
        token.cancel();
        let poller = fast().with_cancellation(token);
        assert!(poller.is_cancelled());

        let detached = poller.detached();
        assert!(!detached.is_cancelled());
        assert_eq!(detached.config(), poller.config());
        let status = detached.await_operation(&gateway, &handle).await.unwrap();
        assert_eq!(status, OperationStatus::Done);
    }

    #[tokio::test]
    async fn test_gateway_error_propagates() {
        let gateway = FakeGateway::new();
        let handle = start_cluster(&gateway).await;
        gateway.fail("get_operation", 503);

        let err = fast().await_operation(&gateway, &handle).await.unwrap_err();
        assert!(matches!(err, PollError::Gateway(GatewayError::Api { status: 503, .. })));
    }
}
