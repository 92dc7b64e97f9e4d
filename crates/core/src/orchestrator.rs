//! Pairing candidate bursts with forks.
//!
//! Each burst is replayed on a fork of its own. Bursts are evaluated concurrently and finish in
//! no particular order; within one burst every transaction goes through
//! [`send_transactions`](crate::submission::send_transactions) in order.

use crate::coordinator::CoordinatorClient;
use crate::error::{BurstError, SubmissionError};
use crate::fork::Fork;
use crate::submission::send_transactions;
use fork_pool_types::{Burst, ForkReceipt, WorkRequest};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of evaluating one burst.
#[derive(Debug)]
pub enum BurstVerdict {
    /// Every transaction was included; the burst was forwarded to the coordinator.
    Workable { receipts: Vec<ForkReceipt> },
    /// A transaction reverted. A regular outcome: the burst is simply not workable yet.
    Reverted {
        log_id: String,
        receipt: Box<ForkReceipt>,
    },
    /// Evaluation could not complete.
    Failed(BurstError),
    /// No fork was left to evaluate the burst on.
    Unassigned,
}

impl BurstVerdict {
    pub fn is_workable(&self) -> bool {
        matches!(self, BurstVerdict::Workable { .. })
    }
}

#[derive(Debug)]
pub struct BurstReport {
    pub correlation_id: String,
    /// Port of the fork the burst was evaluated on.
    pub port: Option<u16>,
    pub verdict: BurstVerdict,
}

/// Evaluates bursts for a single job on a pool of aligned forks.
pub struct Orchestrator {
    job: String,
    coordinator: Arc<dyn CoordinatorClient>,
    forks: Vec<Fork>,
}

impl Orchestrator {
    pub fn new(
        job: impl Into<String>,
        coordinator: Arc<dyn CoordinatorClient>,
        forks: Vec<Fork>,
    ) -> Self {
        Self {
            job: job.into(),
            coordinator,
            forks,
        }
    }

    /// Consumes the pool. Every fork is used for at most one burst and shut down afterwards.
    /// Forks left over once `bursts` ends are shut down as well.
    pub async fn run(self, bursts: impl Stream<Item = Burst>) -> Vec<BurstReport> {
        let Orchestrator {
            job,
            coordinator,
            forks,
        } = self;
        let concurrency = forks.len().max(1);
        let mut forks = forks.into_iter();
        let mut seen = HashSet::new();

        let assigned = bursts.map(|burst| {
            let assignment = if !seen.insert(burst.correlation_id.clone()) {
                Err(BurstError::DuplicateCorrelationId(burst.correlation_id.clone()))
            } else if burst.tx_count() == 0 {
                Err(BurstError::EmptyBurst(burst.correlation_id.clone()))
            } else {
                Ok(forks.next())
            };
            (burst, assignment)
        });

        let reports = assigned
            .map(|(burst, assignment)| {
                let job = job.as_str();
                let coordinator = coordinator.as_ref();
                async move {
                    match assignment {
                        Err(err) => BurstReport {
                            correlation_id: burst.correlation_id,
                            port: None,
                            verdict: BurstVerdict::Failed(err),
                        },
                        Ok(None) => {
                            tracing::warn!(
                                correlation_id = %burst.correlation_id,
                                "no fork left for burst"
                            );
                            BurstReport {
                                correlation_id: burst.correlation_id,
                                port: None,
                                verdict: BurstVerdict::Unassigned,
                            }
                        }
                        Ok(Some(fork)) => evaluate(job, coordinator, fork, burst).await,
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        futures::future::join_all(forks.map(Fork::shutdown)).await;
        reports
    }
}

async fn evaluate(
    job: &str,
    coordinator: &dyn CoordinatorClient,
    fork: Fork,
    burst: Burst,
) -> BurstReport {
    let port = fork.port();
    tracing::debug!(
        port,
        correlation_id = %burst.correlation_id,
        txs = burst.tx_count(),
        "evaluating burst"
    );

    let verdict = replay(job, coordinator, &fork, &burst).await;
    fork.shutdown().await;

    match &verdict {
        BurstVerdict::Workable { receipts } => tracing::info!(
            port,
            correlation_id = %burst.correlation_id,
            txs = receipts.len(),
            "burst is workable"
        ),
        BurstVerdict::Reverted { log_id, receipt } => tracing::info!(
            port,
            correlation_id = %burst.correlation_id,
            log_id = %log_id,
            hash = %receipt.transaction_hash,
            "burst reverted in fork"
        ),
        BurstVerdict::Failed(err) => tracing::error!(
            port,
            correlation_id = %burst.correlation_id,
            %err,
            "burst evaluation failed"
        ),
        BurstVerdict::Unassigned => {}
    }

    BurstReport {
        correlation_id: burst.correlation_id,
        port: Some(port),
        verdict,
    }
}

async fn replay(
    job: &str,
    coordinator: &dyn CoordinatorClient,
    fork: &Fork,
    burst: &Burst,
) -> BurstVerdict {
    let mut receipts = Vec::with_capacity(burst.tx_count());
    for group in &burst.work_groups {
        match send_transactions(fork, group.txs.iter().cloned()).await {
            Ok(submissions) => {
                receipts.extend(submissions.into_iter().filter_map(|s| s.receipt().cloned()))
            }
            Err(SubmissionError::Reverted { receipt }) => {
                return BurstVerdict::Reverted {
                    log_id: group.log_id.clone(),
                    receipt,
                }
            }
            Err(err) => return BurstVerdict::Failed(err.into()),
        }
    }

    let request = WorkRequest::from_burst(job, burst);
    match coordinator.report(request).await {
        Ok(()) => BurstVerdict::Workable { receipts },
        Err(err) => BurstVerdict::Failed(BurstError::Report(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::{BurstVerdict, Orchestrator};
    use crate::error::{BurstError, SubmissionError};
    use crate::testing::{mock_fork, FakeCoordinator, MockEngine, CONSUME, SET_FLAG, UNLOCKED};
    use alloy::primitives::{Address, U256};
    use fork_pool_types::{Burst, CandidateTransaction, WorkGroup};
    use std::sync::Arc;

    fn tx(data: u8) -> CandidateTransaction {
        CandidateTransaction::new(UNLOCKED)
            .to(Address::repeat_byte(0x33))
            .data(vec![data])
            .gas_limit(U256::from(100_000u64))
    }

    fn burst(id: &str, txs: Vec<CandidateTransaction>) -> Burst {
        Burst::new(
            id,
            vec![WorkGroup {
                target_block: 101,
                txs,
                log_id: format!("{id}-group"),
            }],
        )
    }

    fn pool(size: u16) -> (Vec<crate::fork::Fork>, Vec<Arc<MockEngine>>) {
        (0..size).map(|i| mock_fork(9000 + i)).unzip()
    }

    #[tokio::test]
    async fn workable_burst_is_forwarded() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, _) = pool(1);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([burst("a", vec![tx(SET_FLAG), tx(CONSUME)])]))
            .await;

        assert_eq!(reports.len(), 1);
        let BurstVerdict::Workable { receipts } = &reports[0].verdict else {
            anyhow::bail!("unexpected verdict: {:?}", reports[0].verdict);
        };
        assert_eq!(receipts.len(), 2);
        assert_eq!(reports[0].port, Some(9000));

        let forwarded = coordinator.reports();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].job, "keeper");
        assert_eq!(forwarded[0].correlation_id, "a");
        assert_eq!(forwarded[0].burst[0].target_block, 101);
        assert_eq!(forwarded[0].burst[0].unsigned_txs.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn reverted_burst_is_not_forwarded() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, _) = pool(1);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([burst("a", vec![tx(CONSUME)])]))
            .await;

        assert!(matches!(
            &reports[0].verdict,
            BurstVerdict::Reverted { log_id, .. } if log_id == "a-group"
        ));
        assert!(coordinator.reports().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn defect_is_reported_as_failure() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, engines) = pool(1);
        engines[0].drop_receipts();
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([burst("a", vec![tx(SET_FLAG)])]))
            .await;

        assert!(matches!(
            reports[0].verdict,
            BurstVerdict::Failed(BurstError::Submission(SubmissionError::MissingReceipt { .. }))
        ));
        assert!(coordinator.reports().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn bursts_are_isolated_on_separate_forks() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, engines) = pool(2);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        // The second burst depends on state only the first burst creates
        let reports = orchestrator
            .run(futures::stream::iter([
                burst("a", vec![tx(SET_FLAG)]),
                burst("b", vec![tx(CONSUME)]),
            ]))
            .await;

        let verdict = |id: &str| {
            reports
                .iter()
                .find(|report| report.correlation_id == id)
                .map(|report| &report.verdict)
        };
        assert!(matches!(verdict("a"), Some(BurstVerdict::Workable { .. })));
        assert!(matches!(verdict("b"), Some(BurstVerdict::Reverted { .. })));
        assert!(engines.iter().all(|engine| engine.is_released()));
        Ok(())
    }

    #[tokio::test]
    async fn bursts_beyond_pool_size_are_unassigned() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, _) = pool(1);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([
                burst("a", vec![tx(SET_FLAG)]),
                burst("b", vec![tx(SET_FLAG)]),
            ]))
            .await;

        let unassigned = reports
            .iter()
            .filter(|report| matches!(report.verdict, BurstVerdict::Unassigned))
            .count();
        assert_eq!(unassigned, 1);
        assert_eq!(coordinator.reports().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, _) = pool(2);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([
                burst("a", vec![tx(SET_FLAG)]),
                burst("a", vec![tx(SET_FLAG)]),
            ]))
            .await;

        assert_eq!(reports.iter().filter(|r| r.verdict.is_workable()).count(), 1);
        assert!(reports.iter().any(|r| matches!(
            &r.verdict,
            BurstVerdict::Failed(BurstError::DuplicateCorrelationId(id)) if id == "a"
        )));
        assert_eq!(coordinator.reports().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_burst_is_rejected_without_a_fork() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, engines) = pool(1);
        let orchestrator = Orchestrator::new("keeper", coordinator.clone(), forks);

        let reports = orchestrator
            .run(futures::stream::iter([
                Burst::new("none", vec![]),
                burst("hollow", vec![]),
                burst("a", vec![tx(SET_FLAG)]),
            ]))
            .await;

        let verdict = |id: &str| {
            reports
                .iter()
                .find(|report| report.correlation_id == id)
                .map(|report| (report.port, &report.verdict))
        };
        assert!(matches!(
            verdict("none"),
            Some((None, BurstVerdict::Failed(BurstError::EmptyBurst(id)))) if id == "none"
        ));
        assert!(matches!(
            verdict("hollow"),
            Some((None, BurstVerdict::Failed(BurstError::EmptyBurst(id)))) if id == "hollow"
        ));
        // The only fork is still free for the burst that has work
        assert!(matches!(
            verdict("a"),
            Some((Some(9000), BurstVerdict::Workable { .. }))
        ));
        assert_eq!(engines[0].calls_to("eth_sendTransaction"), 1);
        assert_eq!(coordinator.reports().len(), 1);
        assert_eq!(coordinator.reports()[0].correlation_id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn unused_forks_are_shut_down() -> anyhow::Result<()> {
        let coordinator = Arc::new(FakeCoordinator::default());
        let (forks, engines) = pool(3);
        let orchestrator = Orchestrator::new("keeper", coordinator, forks);

        orchestrator
            .run(futures::stream::iter([burst("a", vec![tx(SET_FLAG)])]))
            .await;

        assert!(engines.iter().all(|engine| engine.is_released()));
        Ok(())
    }
}
