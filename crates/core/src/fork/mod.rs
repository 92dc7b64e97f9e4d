//! Fork lifecycle: starting isolated forks and assembling them into an aligned pool.

mod anvil;
mod rpc;

pub use self::anvil::{AnvilLauncher, ProcessFork};
pub use self::rpc::{ForkRpc, HeadSubscription, WsForkRpc};

use crate::coordinator::CoordinatorClient;
use crate::error::{ForkPoolError, ForkStartError, RpcError};
use crate::time::{advance_to_time_and_block, block_by_number};
use alloy::primitives::Address;
use async_trait::async_trait;
use fork_pool_config::{ForkPoolConfig, Timeouts};
use fork_pool_types::BlockHeader;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Everything needed to start a single fork.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkOptions {
    /// Upstream endpoint the fork replays state from.
    pub fork_url: String,
    pub port: u16,
    pub fork_block_number: u64,
    pub gas_limit: u64,
    /// Accounts whose transactions are accepted without a signature.
    pub unlocked_accounts: Vec<Address>,
    pub gas_price: u128,
    pub chain_id: u64,
    pub log_id: Option<String>,
}

/// [`ForkOptions`] shared by every member of a pool, minus the per-fork port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkTemplate {
    pub fork_url: String,
    pub snapshot_block: u64,
    pub gas_limit: u64,
    pub unlocked_accounts: Vec<Address>,
    pub gas_price: u128,
    pub chain_id: u64,
    pub log_id: Option<String>,
}

impl ForkTemplate {
    pub fn from_config(config: &ForkPoolConfig, snapshot_block: u64, gas_limit: u64) -> Self {
        Self {
            fork_url: config.fork_url.clone(),
            snapshot_block,
            gas_limit,
            unlocked_accounts: config.unlocked_accounts.clone(),
            gas_price: config.gas_price,
            chain_id: config.chain_id,
            log_id: None,
        }
    }

    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = Some(log_id.into());
        self
    }

    pub fn options_for(&self, port: u16) -> ForkOptions {
        ForkOptions {
            fork_url: self.fork_url.clone(),
            port,
            fork_block_number: self.snapshot_block,
            gas_limit: self.gas_limit,
            unlocked_accounts: self.unlocked_accounts.clone(),
            gas_price: self.gas_price,
            chain_id: self.chain_id,
            log_id: self.log_id.clone(),
        }
    }
}

/// Starts forks. [`AnvilLauncher`] runs each fork as a separate `anvil` process.
#[async_trait]
pub trait ForkLauncher: Send + Sync {
    /// Resolves once the fork is listening on `options.port`.
    async fn start(&self, options: ForkOptions) -> Result<Fork, ForkStartError>;
}

/// Live resources backing a fork. Released once the [`Fork`] is shut down or dropped.
pub enum ForkEnv {
    Process(ProcessFork),
    /// Fork living inside this process; the value is kept alive for as long as the fork is.
    Embedded(Box<dyn Any + Send + Sync>),
}

/// Last head of the fork as observed by this process.
///
/// Only ever moves forward: older observations are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForkClock {
    pub height: Option<u64>,
    pub timestamp: Option<u64>,
}

/// A running fork owned by exactly one orchestration unit.
pub struct Fork {
    port: u16,
    chain_id: u64,
    snapshot_block: u64,
    rpc: Arc<dyn ForkRpc>,
    timeouts: Timeouts,
    clock: RwLock<ForkClock>,
    env: Option<ForkEnv>,
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("port", &self.port)
            .field("chain_id", &self.chain_id)
            .field("snapshot_block", &self.snapshot_block)
            .field("clock", &self.clock())
            .finish_non_exhaustive()
    }
}

impl Fork {
    pub fn new(
        options: &ForkOptions,
        rpc: Arc<dyn ForkRpc>,
        timeouts: Timeouts,
        env: ForkEnv,
    ) -> Self {
        Self {
            port: options.port,
            chain_id: options.chain_id,
            snapshot_block: options.fork_block_number,
            rpc,
            timeouts,
            clock: RwLock::new(ForkClock {
                height: Some(options.fork_block_number),
                timestamp: None,
            }),
            env: Some(env),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn snapshot_block(&self) -> u64 {
        self.snapshot_block
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn rpc(&self) -> &dyn ForkRpc {
        self.rpc.as_ref()
    }

    fn clock_read(&self) -> RwLockReadGuard<ForkClock> {
        self.clock.read().expect("ForkClock lock is poisoned")
    }

    fn clock_write(&self) -> RwLockWriteGuard<ForkClock> {
        self.clock.write().expect("ForkClock lock is poisoned")
    }

    pub fn clock(&self) -> ForkClock {
        *self.clock_read()
    }

    /// Records a head observed on this fork.
    pub(crate) fn observe(&self, header: &BlockHeader) {
        let mut clock = self.clock_write();
        if clock.height.map_or(true, |height| header.number >= height) {
            clock.height = Some(header.number);
        }
        if clock.timestamp.map_or(true, |ts| header.timestamp >= ts) {
            clock.timestamp = Some(header.timestamp);
        }
    }

    /// Records that `blocks` new blocks were mined without knowing their headers.
    pub(crate) fn observe_mined(&self, blocks: u64, timestamp: Option<u64>) {
        let mut clock = self.clock_write();
        clock.height = clock.height.map(|height| height.saturating_add(blocks));
        if let Some(timestamp) = timestamp {
            clock.timestamp = Some(clock.timestamp.map_or(timestamp, |ts| ts.max(timestamp)));
        }
    }

    /// Calls `method` on the fork, bounded by the configured RPC timeout.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, RpcError> {
        let value = tokio::time::timeout(self.timeouts.rpc, self.rpc.request(method, params))
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
                timeout: self.timeouts.rpc,
            })??;
        serde_json::from_value(value).map_err(|source| RpcError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Stops the fork and releases its port.
    pub async fn shutdown(mut self) {
        match self.env.take() {
            Some(ForkEnv::Process(process)) => process.kill(self.port).await,
            Some(ForkEnv::Embedded(resources)) => drop(resources),
            None => {}
        }
        tracing::debug!(port = self.port, "fork shut down");
    }
}

/// Allocates `amount` ports, starts `amount` forks concurrently from `template` and moves all of
/// them to the same block timestamp: the snapshot block's timestamp plus `time_to_advance`.
///
/// The batch fails if any fork fails to start or to align; forks that did start are shut down
/// before the error is returned.
pub async fn create_forks(
    coordinator: &dyn CoordinatorClient,
    launcher: &dyn ForkLauncher,
    amount: usize,
    template: &ForkTemplate,
    time_to_advance: u64,
) -> Result<Vec<Fork>, ForkPoolError> {
    if amount == 0 {
        return Err(ForkPoolError::EmptyPool);
    }

    let mut ports = Vec::with_capacity(amount);
    let mut seen = HashSet::with_capacity(amount);
    for _ in 0..amount {
        let port = coordinator.request_port().await?;
        if !seen.insert(port) {
            return Err(ForkPoolError::DuplicatePort(port));
        }
        ports.push(port);
    }
    tracing::debug!(?ports, block = template.snapshot_block, "ports allocated for fork pool");

    let results = futures::future::join_all(
        ports
            .iter()
            .map(|port| launcher.start(template.options_for(*port))),
    )
    .await;

    let mut forks = Vec::with_capacity(amount);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(fork) => forks.push(fork),
            Err(err) => {
                tracing::error!(port = ?err.port(), %err, "fork failed to start");
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        shutdown_all(forks).await;
        return Err(err.into());
    }

    if let Err(err) = align(&forks, template.snapshot_block, time_to_advance).await {
        shutdown_all(forks).await;
        return Err(err);
    }

    Ok(forks)
}

async fn align(
    forks: &[Fork],
    snapshot_block: u64,
    time_to_advance: u64,
) -> Result<(), ForkPoolError> {
    // Every fork shares the snapshot state, so any of them can tell its timestamp.
    let reference = &forks[0];
    let snapshot = block_by_number(reference, snapshot_block)
        .await
        .map_err(|source| ForkPoolError::Alignment {
            port: reference.port(),
            source,
        })?;
    let target = snapshot.timestamp.saturating_add(time_to_advance);
    for fork in &forks[1..] {
        fork.observe(&snapshot);
    }

    let results = futures::future::join_all(
        forks
            .iter()
            .map(|fork| async move { (fork.port(), advance_to_time_and_block(fork, target).await) }),
    )
    .await;
    for (port, result) in results {
        result.map_err(|source| ForkPoolError::Alignment { port, source })?;
    }

    tracing::info!(
        forks = forks.len(),
        block = snapshot_block,
        timestamp = target,
        "fork pool aligned"
    );
    Ok(())
}

async fn shutdown_all(forks: Vec<Fork>) {
    if forks.is_empty() {
        return;
    }
    tracing::warn!(forks = forks.len(), "tearing down started forks of a failed pool");
    futures::future::join_all(forks.into_iter().map(Fork::shutdown)).await;
}
