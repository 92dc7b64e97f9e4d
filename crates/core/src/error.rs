use fork_pool_types::ForkReceipt;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error("not a supervised worker: no coordinator channel to request ports from")]
    NotASupervisedWorker,
    #[error("coordinator channel is closed")]
    Disconnected,
    #[error("coordinator did not grant a port within {0:?}")]
    Timeout(Duration),
    #[error("coordinator granted an invalid port `{0}`")]
    InvalidPort(u16),
}

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error(transparent)]
    Client(#[from] jsonrpsee::core::ClientError),
    #[error("engine rejected `{method}` ({code}): {message}")]
    Engine {
        method: String,
        code: i32,
        message: String,
    },
    #[error("failed to encode parameters of `{method}`: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode response of `{method}`: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{method}` did not respond within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

#[derive(thiserror::Error, Debug)]
pub enum ForkStartError {
    #[error("unsupported engine `{bin}`: {reason}")]
    UnsupportedEngine { bin: String, reason: String },
    #[error("failed to spawn fork on port {port}: {source}")]
    Spawn {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("fork on port {port} exited before listening ({status})")]
    Exited { port: u16, status: ExitStatus },
    #[error("fork on port {port} did not start listening within {timeout:?}")]
    Timeout { port: u16, timeout: Duration },
    #[error("fork on port {port} failed to initialize: {source}")]
    Rpc {
        port: u16,
        #[source]
        source: RpcError,
    },
}

impl ForkStartError {
    pub fn port(&self) -> Option<u16> {
        match self {
            ForkStartError::UnsupportedEngine { .. } => None,
            ForkStartError::Spawn { port, .. }
            | ForkStartError::Exited { port, .. }
            | ForkStartError::Timeout { port, .. }
            | ForkStartError::Rpc { port, .. } => Some(*port),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TimeError {
    #[error("timestamp ({requested}) must be greater than the fork's current timestamp ({current})")]
    NotInFuture { requested: u64, current: u64 },
    #[error("block #{0} is unknown to the fork")]
    UnknownBlock(u64),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(thiserror::Error, Debug)]
pub enum SubmissionError {
    /// The transaction was mined with a failing status. This is a regular simulation outcome,
    /// see [`SubmissionError::is_revert`].
    #[error("transaction {} reverted in fork (block #{})", .receipt.transaction_hash, .receipt.block_number)]
    Reverted { receipt: Box<ForkReceipt> },
    #[error("no receipt for transaction {hash} although a block has been mined")]
    MissingReceipt { hash: alloy::primitives::B256 },
    #[error("no block was mined within {0:?} after submission")]
    InclusionTimeout(Duration),
    #[error("block subscription closed before a block was mined")]
    SubscriptionClosed,
    #[error("illegal submission transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::submission::SubmissionState,
        to: crate::submission::SubmissionState,
    },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SubmissionError {
    /// Whether this is a business outcome (the candidate is not workable) rather than a defect.
    pub fn is_revert(&self) -> bool {
        matches!(self, SubmissionError::Reverted { .. })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ForkPoolError {
    #[error("a fork pool needs at least one fork")]
    EmptyPool,
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("coordinator granted port {0} twice")]
    DuplicatePort(u16),
    #[error(transparent)]
    Start(#[from] ForkStartError),
    #[error("failed to align fork on port {port}: {source}")]
    Alignment {
        port: u16,
        #[source]
        source: TimeError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum BurstError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("failed to report burst upstream: {0}")]
    Report(#[source] CoordinatorError),
    #[error("correlation id `{0}` was already evaluated in this run")]
    DuplicateCorrelationId(String),
    #[error("burst `{0}` carries no transactions")]
    EmptyBurst(String),
}
