/// Default upstream endpoint forks are created from
pub const DEFAULT_FORK_URL: &str = "http://127.0.0.1:8545";
/// Binary used to run a fork
pub const DEFAULT_ANVIL_BIN: &str = "anvil";
/// Default chain id reported by forks
pub const DEFAULT_CHAIN_ID: u64 = 1;
/// Default amount of forks created per pool
pub const DEFAULT_POOL_SIZE: usize = 3;
/// Gas price and base fee forks run with, free by default so that unlocked accounts never run dry
pub const DEFAULT_GAS_PRICE: u128 = 0;
/// Seconds a pool is moved past its snapshot block
pub const DEFAULT_TIME_TO_ADVANCE: u64 = 1;
/// Seconds to wait for the coordinator to grant a port
pub const DEFAULT_PORT_GRANT_TIMEOUT_SECS: u64 = 30;
/// Seconds to wait for a fork to start listening
pub const DEFAULT_FORK_START_TIMEOUT_SECS: u64 = 60;
/// Seconds to wait for a single RPC round trip
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
/// Seconds to wait for a submitted transaction to be mined
pub const DEFAULT_INCLUSION_TIMEOUT_SECS: u64 = 30;
/// Interval between readiness checks of a starting fork
pub const FORK_READINESS_POLL_INTERVAL_MS: u64 = 100;
/// Environment variable set by the coordinator when it spawns a supervised worker
pub const SUPERVISOR_ENV: &str = "FORK_POOL_SUPERVISOR";
