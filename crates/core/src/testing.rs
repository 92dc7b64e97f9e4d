//! This file hold testing helpers for other unit tests.
//!
//! There is `MockEngine` that simulates a running fork in memory: it mines blocks, executes a
//! tiny set of transaction semantics and serves `newHeads` subscriptions. `MockLauncher` and
//! `FakeCoordinator` stand in for `anvil` and the supervising coordinator.

#![cfg(test)]

use crate::coordinator::CoordinatorClient;
use crate::error::{CoordinatorError, ForkStartError, RpcError};
use crate::fork::{Fork, ForkEnv, ForkLauncher, ForkOptions, ForkRpc, HeadSubscription};
use alloy::primitives::{address, keccak256, Address, B256, U256};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use fork_pool_config::Timeouts;
use fork_pool_types::{BlockHeader, CandidateTransaction, ForkReceipt, WorkRequest};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const SNAPSHOT_BLOCK: u64 = 100;
pub const SNAPSHOT_TIMESTAMP: u64 = 1_700_000_000;
/// Seconds between blocks mined without a pinned timestamp.
pub const BLOCK_TIME: u64 = 12;
/// Account every mock fork treats as unlocked.
pub const UNLOCKED: Address = address!("00000000000000000000000000000000000a11ce");

/// Calldata that sets the engine's storage flag.
pub const SET_FLAG: u8 = 0x01;
/// Calldata that reverts unless the storage flag was set by an earlier transaction.
pub const CONSUME: u8 = 0x02;

const INTRINSIC_GAS: u64 = 21_000;

pub fn test_timeouts() -> Timeouts {
    Timeouts {
        port_grant: Duration::from_secs(1),
        fork_start: Duration::from_secs(1),
        rpc: Duration::from_secs(1),
        inclusion: Duration::from_millis(200),
    }
}

#[derive(Debug)]
struct PendingTx {
    hash: B256,
    tx: CandidateTransaction,
    status: u64,
    gas_used: U256,
}

#[derive(Debug)]
struct EngineState {
    blocks: BTreeMap<u64, BlockHeader>,
    time_offset: u64,
    pending: Vec<PendingTx>,
    receipts: HashMap<B256, ForkReceipt>,
    flag: bool,
    drop_receipts: bool,
    failing_mine: bool,
    malformed_hashes: bool,
    tx_count: u64,
    sent: Vec<Value>,
    calls: Vec<String>,
    unlocked: Vec<Address>,
}

/// In-memory fork engine.
#[derive(Debug)]
pub struct MockEngine {
    state: Mutex<EngineState>,
    heads: broadcast::Sender<BlockHeader>,
    subscribers: Arc<AtomicUsize>,
    automine: bool,
    released: AtomicBool,
}

fn block_hash(number: u64, timestamp: u64) -> B256 {
    let mut preimage = number.to_be_bytes().to_vec();
    preimage.extend_from_slice(&timestamp.to_be_bytes());
    keccak256(preimage)
}

fn header(number: u64, timestamp: u64) -> BlockHeader {
    BlockHeader {
        number,
        timestamp,
        hash: block_hash(number, timestamp),
    }
}

fn invalid_params(method: &str, message: impl Into<String>) -> RpcError {
    RpcError::Engine {
        method: method.to_string(),
        code: -32602,
        message: message.into(),
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// An engine forked at [`SNAPSHOT_BLOCK`] that mines a block for every transaction.
    pub fn new() -> Self {
        let (heads, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(EngineState {
                blocks: BTreeMap::from([(
                    SNAPSHOT_BLOCK,
                    header(SNAPSHOT_BLOCK, SNAPSHOT_TIMESTAMP),
                )]),
                time_offset: 0,
                pending: Vec::new(),
                receipts: HashMap::new(),
                flag: false,
                drop_receipts: false,
                failing_mine: false,
                malformed_hashes: false,
                tx_count: 0,
                sent: Vec::new(),
                calls: Vec::new(),
                unlocked: Vec::new(),
            }),
            heads,
            subscribers: Arc::new(AtomicUsize::new(0)),
            automine: true,
            released: AtomicBool::new(false),
        }
    }

    /// Transactions stay pending until [`MockEngine::mine`] is called.
    pub fn without_automine(mut self) -> Self {
        self.automine = false;
        self
    }

    /// Every `evm_mine` request is answered with an engine error.
    pub fn with_failing_mine(mut self) -> Self {
        self.state
            .get_mut()
            .expect("MockEngine lock is poisoned")
            .failing_mine = true;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("MockEngine lock is poisoned")
    }

    /// Mines one block including every pending transaction and notifies subscribers.
    pub fn mine(&self, timestamp: Option<u64>) -> BlockHeader {
        let mined = {
            let mut state = self.state();
            let (last_number, last_timestamp) = state
                .blocks
                .last_key_value()
                .map(|(number, header)| (*number, header.timestamp))
                .unwrap_or((SNAPSHOT_BLOCK, SNAPSHOT_TIMESTAMP));
            let timestamp =
                timestamp.unwrap_or(last_timestamp + BLOCK_TIME + state.time_offset);
            state.time_offset = 0;

            let mined = header(last_number + 1, timestamp);
            state.blocks.insert(mined.number, mined.clone());
            let pending = std::mem::take(&mut state.pending);
            if !state.drop_receipts {
                for tx in pending {
                    let receipt = ForkReceipt {
                        transaction_hash: tx.hash,
                        block_number: mined.number,
                        block_hash: mined.hash,
                        gas_used: tx.gas_used,
                        status: tx.status,
                        from: tx.tx.from,
                        to: tx.tx.to,
                        contract_address: None,
                    };
                    state.receipts.insert(tx.hash, receipt);
                }
            }
            mined
        };
        // Nobody listening is fine
        let _ = self.heads.send(mined.clone());
        mined
    }

    fn send_transaction(&self, params: &[Value]) -> Result<Value, RpcError> {
        let raw = params
            .first()
            .ok_or_else(|| invalid_params("eth_sendTransaction", "missing transaction"))?;
        let tx: CandidateTransaction =
            serde_json::from_value(raw.clone()).map_err(|source| RpcError::Decode {
                method: "eth_sendTransaction".to_string(),
                source,
            })?;

        let hash = {
            let mut state = self.state();
            state.sent.push(raw.clone());
            state.tx_count += 1;
            let hash = keccak256(state.tx_count.to_be_bytes());

            let gas_limit = tx.gas_limit.unwrap_or(U256::from(INTRINSIC_GAS));
            let (status, gas_used) = if gas_limit < U256::from(INTRINSIC_GAS) {
                (0, gas_limit)
            } else {
                let succeeded = match tx.data.as_slice() {
                    [SET_FLAG] => {
                        state.flag = true;
                        true
                    }
                    [CONSUME] => std::mem::take(&mut state.flag),
                    _ => true,
                };
                (u64::from(succeeded), U256::from(INTRINSIC_GAS))
            };
            state.pending.push(PendingTx {
                hash,
                tx,
                status,
                gas_used,
            });
            hash
        };

        if self.automine {
            self.mine(None);
        }
        if self.state().malformed_hashes {
            return Ok(Value::from("0xdeadbeef"));
        }
        Ok(Value::from(hash.to_string()))
    }

    fn block_by_number(&self, params: &[Value]) -> Result<Value, RpcError> {
        let tag = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("eth_getBlockByNumber", "missing block tag"))?;
        let state = self.state();
        let header = if tag == "latest" {
            state.blocks.last_key_value().map(|(_, header)| header)
        } else {
            let number = u64::from_str_radix(tag.trim_start_matches("0x"), 16)
                .map_err(|err| invalid_params("eth_getBlockByNumber", err.to_string()))?;
            state.blocks.get(&number)
        };
        Ok(serde_json::to_value(header).expect("header serializes"))
    }

    fn receipt(&self, params: &[Value]) -> Result<Value, RpcError> {
        let hash = params
            .first()
            .and_then(Value::as_str)
            .and_then(|hash| hash.parse::<B256>().ok())
            .ok_or_else(|| invalid_params("eth_getTransactionReceipt", "invalid hash"))?;
        let receipt = self.state().receipts.get(&hash).cloned();
        Ok(serde_json::to_value(receipt).expect("receipt serializes"))
    }

    /// Every subsequently mined transaction is left without a receipt.
    pub fn drop_receipts(&self) {
        self.state().drop_receipts = true;
    }

    /// `eth_sendTransaction` answers with something that is not a 32 byte hash.
    pub fn answer_malformed_hashes(&self) {
        self.state().malformed_hashes = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|call| *call == method).count()
    }

    pub fn last_sent(&self) -> Option<Value> {
        self.state().sent.last().cloned()
    }

    pub fn last_hash(&self) -> Option<B256> {
        let count = self.state().tx_count;
        (count > 0).then(|| keccak256(count.to_be_bytes()))
    }

    pub fn unlocked(&self) -> Vec<Address> {
        self.state().unlocked.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    pub async fn wait_for_subscribers(&self, amount: usize) {
        (|| async move {
            if self.active_subscriptions() >= amount {
                Ok(())
            } else {
                Err(anyhow::anyhow!("not enough subscribers yet"))
            }
        })
        .retry(
            ConstantBuilder::default()
                .with_delay(Duration::from_millis(5))
                .with_max_times(200),
        )
        .await
        .expect("subscribers never showed up");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForkRpc for MockEngine {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.state().calls.push(method.to_string());
        match method {
            "eth_chainId" => Ok(Value::from("0x1")),
            "evm_mine" => {
                let timestamp = params.first().and_then(Value::as_u64);
                {
                    let state = self.state();
                    if state.failing_mine {
                        return Err(RpcError::Engine {
                            method: method.to_string(),
                            code: -32603,
                            message: "block production failed".to_string(),
                        });
                    }
                    let last = state
                        .blocks
                        .last_key_value()
                        .map(|(_, header)| header.timestamp)
                        .unwrap_or(SNAPSHOT_TIMESTAMP);
                    if let Some(timestamp) = timestamp.filter(|timestamp| *timestamp <= last) {
                        return Err(RpcError::Engine {
                            method: method.to_string(),
                            code: -32000,
                            message: format!(
                                "timestamp error: {timestamp} is lower than or equal to previous block's timestamp"
                            ),
                        });
                    }
                }
                self.mine(timestamp);
                Ok(Value::from("0x0"))
            }
            "evm_increaseTime" => {
                let seconds = params
                    .first()
                    .and_then(Value::as_u64)
                    .ok_or_else(|| invalid_params(method, "missing seconds"))?;
                let mut state = self.state();
                state.time_offset += seconds;
                Ok(Value::from(state.time_offset))
            }
            "eth_sendTransaction" => self.send_transaction(&params),
            "eth_getTransactionReceipt" => self.receipt(&params),
            "eth_getBlockByNumber" => self.block_by_number(&params),
            "anvil_impersonateAccount" => {
                let account = params
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|account| account.parse::<Address>().ok())
                    .ok_or_else(|| invalid_params(method, "invalid address"))?;
                self.state().unlocked.push(account);
                Ok(Value::Null)
            }
            _ => Err(RpcError::Engine {
                method: method.to_string(),
                code: -32601,
                message: "method not found".to_string(),
            }),
        }
    }

    async fn subscribe_new_heads(&self) -> Result<Box<dyn HeadSubscription>, RpcError> {
        let receiver = self.heads.subscribe();
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSubscription {
            receiver,
            subscribers: self.subscribers.clone(),
        }))
    }
}

struct MockSubscription {
    receiver: broadcast::Receiver<BlockHeader>,
    subscribers: Arc<AtomicUsize>,
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HeadSubscription for MockSubscription {
    async fn next_head(&mut self) -> Option<Result<BlockHeader, RpcError>> {
        loop {
            match self.receiver.recv().await {
                Ok(header) => return Some(Ok(header)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), RpcError> {
        Ok(())
    }
}

/// Marks the engine (and optionally a launcher counter) as released once the fork lets go of it.
struct ReleaseGuard {
    engine: Arc<MockEngine>,
    released: Option<Arc<AtomicUsize>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.engine.released.store(true, Ordering::SeqCst);
        if let Some(released) = &self.released {
            released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn mock_options(port: u16) -> ForkOptions {
    ForkOptions {
        fork_url: "http://upstream.invalid".to_string(),
        port,
        fork_block_number: SNAPSHOT_BLOCK,
        gas_limit: 30_000_000,
        unlocked_accounts: vec![UNLOCKED],
        gas_price: 0,
        chain_id: 1,
        log_id: None,
    }
}

fn fork_on(
    options: &ForkOptions,
    engine: Arc<MockEngine>,
    released: Option<Arc<AtomicUsize>>,
) -> Fork {
    let guard = ReleaseGuard {
        engine: engine.clone(),
        released,
    };
    Fork::new(
        options,
        engine,
        test_timeouts(),
        ForkEnv::Embedded(Box::new(guard)),
    )
}

/// A fork on `port` backed by a fresh automining [`MockEngine`].
pub fn mock_fork(port: u16) -> (Fork, Arc<MockEngine>) {
    mock_fork_with(port, MockEngine::new())
}

pub fn mock_fork_with(port: u16, engine: MockEngine) -> (Fork, Arc<MockEngine>) {
    let engine = Arc::new(engine);
    (fork_on(&mock_options(port), engine.clone(), None), engine)
}

/// [`ForkLauncher`] that starts [`MockEngine`]s.
#[derive(Default)]
pub struct MockLauncher {
    failing_on: Option<u16>,
    failing_alignment_on: Option<u16>,
    engines: Mutex<HashMap<u16, Arc<MockEngine>>>,
    started: AtomicUsize,
    released: Arc<AtomicUsize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockLauncher {
    /// Starting a fork on `port` times out.
    pub fn failing_on(mut self, port: u16) -> Self {
        self.failing_on = Some(port);
        self
    }

    /// The fork on `port` starts but cannot mine blocks.
    pub fn failing_alignment_on(mut self, port: u16) -> Self {
        self.failing_alignment_on = Some(port);
        self
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn engine(&self, port: u16) -> Option<Arc<MockEngine>> {
        self.engines
            .lock()
            .expect("MockLauncher lock is poisoned")
            .get(&port)
            .cloned()
    }
}

#[async_trait]
impl ForkLauncher for MockLauncher {
    async fn start(&self, options: ForkOptions) -> Result<Fork, ForkStartError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let port = options.port;
        if self.failing_on == Some(port) {
            return Err(ForkStartError::Timeout {
                port,
                timeout: test_timeouts().fork_start,
            });
        }

        let engine = if self.failing_alignment_on == Some(port) {
            MockEngine::new().with_failing_mine()
        } else {
            MockEngine::new()
        };
        let engine = Arc::new(engine);
        let fork = fork_on(&options, engine.clone(), Some(self.released.clone()));
        for account in &options.unlocked_accounts {
            fork.call::<Value>(
                "anvil_impersonateAccount",
                vec![Value::from(account.to_string())],
            )
            .await
            .map_err(|source| ForkStartError::Rpc { port, source })?;
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        self.engines
            .lock()
            .expect("MockLauncher lock is poisoned")
            .insert(port, engine);
        Ok(fork)
    }
}

/// [`CoordinatorClient`] granting ports from a fixed list and recording reports.
#[derive(Debug, Default)]
pub struct FakeCoordinator {
    ports: Mutex<VecDeque<u16>>,
    port_requests: AtomicUsize,
    reports: Mutex<Vec<WorkRequest>>,
}

impl FakeCoordinator {
    pub fn with_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: Mutex::new(ports.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn port_requests(&self) -> usize {
        self.port_requests.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<WorkRequest> {
        self.reports
            .lock()
            .expect("FakeCoordinator lock is poisoned")
            .clone()
    }
}

#[async_trait]
impl CoordinatorClient for FakeCoordinator {
    async fn request_port(&self) -> Result<u16, CoordinatorError> {
        self.port_requests.fetch_add(1, Ordering::SeqCst);
        self.ports
            .lock()
            .expect("FakeCoordinator lock is poisoned")
            .pop_front()
            .ok_or(CoordinatorError::Disconnected)
    }

    async fn report(&self, request: WorkRequest) -> Result<(), CoordinatorError> {
        self.reports
            .lock()
            .expect("FakeCoordinator lock is poisoned")
            .push(request);
        Ok(())
    }
}
