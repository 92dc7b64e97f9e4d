//! Client side of the coordinator protocol.
//!
//! A worker running under a supervising coordinator negotiates free ports for its forks and
//! forwards workable bursts upstream. Both directions are fire-and-forget message streams; a port
//! request is answered by the next grant on the inbound stream.

pub mod stdio;

use crate::error::CoordinatorError;
use async_trait::async_trait;
use fork_pool_types::{CoreMessage, JobMessage, WorkRequest};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Obtains a port that is not in use by any other fork.
    async fn request_port(&self) -> Result<u16, CoordinatorError>;

    /// Forwards a workable burst for real submission.
    async fn report(&self, request: WorkRequest) -> Result<(), CoordinatorError>;
}

/// [`CoordinatorClient`] over a pair of message channels.
///
/// Concurrent callers of [`PortBroker::request_port`] each consume exactly one grant from the
/// shared inbound stream, in the order they started waiting. Grants are not matched to specific
/// requests: two concurrent requests may resolve in either order, but never to the same grant.
#[derive(Debug)]
pub struct PortBroker {
    outbound: Option<mpsc::UnboundedSender<JobMessage>>,
    inbound: Mutex<mpsc::UnboundedReceiver<CoreMessage>>,
    grant_timeout: Duration,
}

/// The coordinator's side of a [`PortBroker::channel`].
#[derive(Debug)]
pub struct CoordinatorEnd {
    pub requests: mpsc::UnboundedReceiver<JobMessage>,
    pub grants: mpsc::UnboundedSender<CoreMessage>,
}

impl PortBroker {
    /// `outbound` is `None` when the process is not supervised; every port request then fails
    /// with [`CoordinatorError::NotASupervisedWorker`].
    pub fn new(
        outbound: Option<mpsc::UnboundedSender<JobMessage>>,
        inbound: mpsc::UnboundedReceiver<CoreMessage>,
        grant_timeout: Duration,
    ) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
            grant_timeout,
        }
    }

    /// A broker that is not attached to any coordinator.
    pub fn unsupervised(grant_timeout: Duration) -> Self {
        let (_, inbound) = mpsc::unbounded_channel();
        Self::new(None, inbound, grant_timeout)
    }

    /// An in-process broker together with the coordinator end of its channels.
    pub fn channel(grant_timeout: Duration) -> (Self, CoordinatorEnd) {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (grants, grants_rx) = mpsc::unbounded_channel();
        (
            Self::new(Some(requests_tx), grants_rx, grant_timeout),
            CoordinatorEnd { requests, grants },
        )
    }

    fn send(&self, message: JobMessage) -> Result<(), CoordinatorError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(CoordinatorError::NotASupervisedWorker)?;
        outbound
            .send(message)
            .map_err(|_| CoordinatorError::Disconnected)
    }
}

#[async_trait]
impl CoordinatorClient for PortBroker {
    async fn request_port(&self) -> Result<u16, CoordinatorError> {
        self.send(JobMessage::PortRequest)?;

        let grant = tokio::time::timeout(self.grant_timeout, async {
            // `tokio::sync::Mutex` is fair: waiters are served in the order they queued up
            self.inbound.lock().await.recv().await
        })
        .await
        .map_err(|_| CoordinatorError::Timeout(self.grant_timeout))?;

        match grant {
            None => Err(CoordinatorError::Disconnected),
            Some(CoreMessage::AvailablePort { port: 0 }) => Err(CoordinatorError::InvalidPort(0)),
            Some(CoreMessage::AvailablePort { port }) => {
                tracing::debug!(port, "coordinator granted port");
                Ok(port)
            }
        }
    }

    async fn report(&self, request: WorkRequest) -> Result<(), CoordinatorError> {
        tracing::debug!(
            job = %request.job,
            correlation_id = %request.correlation_id,
            groups = request.burst.len(),
            "forwarding workable burst"
        );
        self.send(JobMessage::WorkRequest(request))
    }
}

#[cfg(test)]
mod tests {
    use super::{CoordinatorClient, PortBroker};
    use crate::error::CoordinatorError;
    use fork_pool_types::{CoreMessage, JobMessage, WorkRequest};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn grant_resolves_request() -> anyhow::Result<()> {
        let (broker, mut coordinator) = PortBroker::channel(TIMEOUT);

        let request = tokio::spawn(async move { broker.request_port().await });
        assert_eq!(coordinator.requests.recv().await, Some(JobMessage::PortRequest));
        coordinator
            .grants
            .send(CoreMessage::AvailablePort { port: 8600 })?;

        assert_eq!(request.await??, 8600);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_with_reversed_grants_get_distinct_ports() -> anyhow::Result<()> {
        let (broker, mut coordinator) = PortBroker::channel(TIMEOUT);
        let coordinator = async move {
            coordinator.requests.recv().await;
            coordinator.requests.recv().await;
            // Answer the second request first
            for port in [9002, 9001] {
                coordinator
                    .grants
                    .send(CoreMessage::AvailablePort { port })
                    .unwrap();
            }
        };

        let (first, second, ()) =
            tokio::join!(broker.request_port(), broker.request_port(), coordinator);

        let mut ports = vec![first?, second?];
        ports.sort();
        assert_eq!(ports, vec![9001, 9002]);
        Ok(())
    }

    #[tokio::test]
    async fn unsupervised_process_cannot_allocate() {
        let broker = PortBroker::unsupervised(TIMEOUT);

        let err = broker.request_port().await.unwrap_err();

        assert!(matches!(err, CoordinatorError::NotASupervisedWorker));
    }

    #[tokio::test]
    async fn silent_coordinator_times_out() {
        let (broker, _coordinator) = PortBroker::channel(Duration::from_millis(50));

        let err = broker.request_port().await.unwrap_err();

        assert!(matches!(err, CoordinatorError::Timeout(_)));
    }

    #[tokio::test]
    async fn closed_grant_stream_is_a_disconnect() {
        let (broker, coordinator) = PortBroker::channel(TIMEOUT);
        drop(coordinator.grants);

        let err = broker.request_port().await.unwrap_err();

        assert!(matches!(err, CoordinatorError::Disconnected));
    }

    #[tokio::test]
    async fn zero_port_is_rejected() -> anyhow::Result<()> {
        let (broker, coordinator) = PortBroker::channel(TIMEOUT);
        coordinator
            .grants
            .send(CoreMessage::AvailablePort { port: 0 })?;

        let err = broker.request_port().await.unwrap_err();

        assert!(matches!(err, CoordinatorError::InvalidPort(0)));
        Ok(())
    }

    #[tokio::test]
    async fn report_forwards_work_request() -> anyhow::Result<()> {
        let (broker, mut coordinator) = PortBroker::channel(TIMEOUT);
        let request = WorkRequest {
            job: "liquidations".to_string(),
            correlation_id: "c-1".to_string(),
            burst: vec![],
        };

        broker.report(request.clone()).await?;

        assert_eq!(
            coordinator.requests.recv().await,
            Some(JobMessage::WorkRequest(request))
        );
        Ok(())
    }
}
