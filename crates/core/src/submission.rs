//! Replaying candidate transactions on a fork.
//!
//! Every transaction goes through `Built -> Submitted -> AwaitingInclusion -> {Included |
//! Reverted} -> Finalized`. Transactions on one fork are processed strictly one at a time: the
//! next one is only submitted once the previous one has been classified, which keeps nonces in
//! order.

use crate::error::{RpcError, SubmissionError};
use crate::fork::{Fork, HeadSubscription};
use alloy::primitives::B256;
use fork_pool_types::serde_helpers::b256_hex;
use fork_pool_types::{BlockHeader, CandidateTransaction, ForkReceipt};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Built,
    Submitted,
    AwaitingInclusion,
    Included,
    Reverted,
    Finalized,
}

impl SubmissionState {
    fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Built, Submitted)
                | (Submitted, AwaitingInclusion)
                | (AwaitingInclusion, Included)
                | (AwaitingInclusion, Reverted)
                | (Included, Finalized)
                | (Reverted, Finalized)
        )
    }
}

/// A candidate transaction travelling through the submission protocol.
#[derive(Clone, Debug)]
pub struct Submission {
    tx: CandidateTransaction,
    hash: Option<B256>,
    state: SubmissionState,
    /// Whether the transaction was included successfully; known once classified.
    succeeded: Option<bool>,
    receipt: Option<ForkReceipt>,
}

impl Submission {
    pub fn new(tx: CandidateTransaction) -> Self {
        Self {
            tx,
            hash: None,
            state: SubmissionState::Built,
            succeeded: None,
            receipt: None,
        }
    }

    pub fn tx(&self) -> &CandidateTransaction {
        &self.tx
    }

    pub fn hash(&self) -> Option<B256> {
        self.hash
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn receipt(&self) -> Option<&ForkReceipt> {
        self.receipt.as_ref()
    }

    /// `Some(true)` if included, `Some(false)` if reverted, `None` while still in flight.
    pub fn succeeded(&self) -> Option<bool> {
        self.succeeded
    }

    fn transition(&mut self, next: SubmissionState) -> Result<(), SubmissionError> {
        if !self.state.can_transition_to(next) {
            return Err(SubmissionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn submitted(&mut self, hash: B256) -> Result<(), SubmissionError> {
        self.transition(SubmissionState::Submitted)?;
        self.hash = Some(hash);
        Ok(())
    }

    fn classified(&mut self, receipt: ForkReceipt) -> Result<(), SubmissionError> {
        let succeeded = receipt.succeeded();
        self.transition(if succeeded {
            SubmissionState::Included
        } else {
            SubmissionState::Reverted
        })?;
        self.succeeded = Some(succeeded);
        self.receipt = Some(receipt);
        self.transition(SubmissionState::Finalized)
    }
}

/// One-shot interest in the next block mined on a fork.
///
/// Registering before acting guarantees the block produced by that action is not missed.
pub struct NextBlock {
    subscription: Box<dyn HeadSubscription>,
}

impl NextBlock {
    pub async fn watch(fork: &Fork) -> Result<Self, RpcError> {
        let timeout = fork.timeouts().rpc;
        let subscription = tokio::time::timeout(timeout, fork.rpc().subscribe_new_heads())
            .await
            .map_err(|_| RpcError::Timeout {
                method: "eth_subscribe".to_string(),
                timeout,
            })??;
        Ok(Self { subscription })
    }

    /// Suspends until exactly one block notification arrives, then cancels the subscription.
    pub async fn wait(mut self, fork: &Fork) -> Result<BlockHeader, SubmissionError> {
        let timeout = fork.timeouts().inclusion;
        let next = tokio::time::timeout(timeout, self.subscription.next_head()).await;
        self.cancel(fork).await;

        let header = match next {
            Err(_) => return Err(SubmissionError::InclusionTimeout(timeout)),
            Ok(None) => return Err(SubmissionError::SubscriptionClosed),
            Ok(Some(header)) => header?,
        };
        fork.observe(&header);
        Ok(header)
    }

    /// Drops interest without waiting.
    pub async fn cancel(self, fork: &Fork) {
        let timeout = fork.timeouts().rpc;
        match tokio::time::timeout(timeout, self.subscription.unsubscribe()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(port = fork.port(), %err, "failed to unsubscribe"),
            Err(_) => tracing::debug!(port = fork.port(), "unsubscribe timed out"),
        }
    }
}

/// Sends `tx` to the fork and returns its hash. The hash is known before the transaction is
/// mined.
pub async fn submit(fork: &Fork, tx: &CandidateTransaction) -> Result<B256, RpcError> {
    let params = tx.to_rpc_object().map_err(|source| RpcError::Encode {
        method: "eth_sendTransaction".to_string(),
        source,
    })?;
    let hash: Value = fork.call("eth_sendTransaction", vec![params]).await?;
    b256_hex::deserialize(hash).map_err(|source| RpcError::Decode {
        method: "eth_sendTransaction".to_string(),
        source,
    })
}

/// Waits for the next block mined on the fork.
///
/// `next_block` has to be registered with [`NextBlock::watch`] *before* the transaction is
/// submitted, an automining fork produces the block while `submit` is still in flight.
///
/// This is a single wait, not a poll for a specific transaction: blocks on a fork are only ever
/// produced by this process, so the next block is the one that had the chance to include the
/// submitted transaction.
pub async fn await_inclusion(
    fork: &Fork,
    next_block: NextBlock,
) -> Result<BlockHeader, SubmissionError> {
    next_block.wait(fork).await
}

/// Fetches the receipt of `hash` and classifies it.
///
/// Must only be called after a block was mined: a missing receipt is a protocol violation.
pub async fn classify(fork: &Fork, hash: B256) -> Result<ForkReceipt, SubmissionError> {
    let receipt: Option<ForkReceipt> = fork
        .call(
            "eth_getTransactionReceipt",
            vec![Value::from(hash.to_string())],
        )
        .await?;
    let receipt = receipt.ok_or(SubmissionError::MissingReceipt { hash })?;
    if !receipt.succeeded() {
        return Err(SubmissionError::Reverted {
            receipt: Box::new(receipt),
        });
    }
    Ok(receipt)
}

/// Runs one transaction through the whole protocol.
pub async fn send_transaction(
    fork: &Fork,
    tx: CandidateTransaction,
) -> Result<Submission, SubmissionError> {
    let mut submission = Submission::new(tx);

    let next_block = NextBlock::watch(fork).await?;
    let hash = match submit(fork, submission.tx()).await {
        Ok(hash) => hash,
        Err(err) => {
            next_block.cancel(fork).await;
            return Err(err.into());
        }
    };
    submission.submitted(hash)?;

    submission.transition(SubmissionState::AwaitingInclusion)?;
    let header = await_inclusion(fork, next_block).await?;

    let receipt = match classify(fork, hash).await {
        Ok(receipt) => receipt,
        Err(SubmissionError::Reverted { receipt }) => {
            submission.classified((*receipt).clone())?;
            tracing::info!(
                port = fork.port(),
                %hash,
                block = header.number,
                "transaction reverted in fork"
            );
            return Err(SubmissionError::Reverted { receipt });
        }
        Err(err) => return Err(err),
    };
    tracing::info!(
        port = fork.port(),
        %hash,
        block = receipt.block_number,
        gas_used = %receipt.gas_used,
        "transaction sent to fork"
    );
    submission.classified(receipt)?;
    Ok(submission)
}

/// Runs `txs` through the protocol strictly in order; stops at the first transaction that does
/// not get included.
pub async fn send_transactions(
    fork: &Fork,
    txs: impl IntoIterator<Item = CandidateTransaction>,
) -> Result<Vec<Submission>, SubmissionError> {
    let mut submissions = Vec::new();
    for tx in txs {
        submissions.push(send_transaction(fork, tx).await?);
    }
    Ok(submissions)
}
