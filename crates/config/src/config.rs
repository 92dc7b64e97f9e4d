use crate::constants::*;
use alloy::primitives::Address;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Configuration of a fork pool.
///
/// Meant to be flattened into the host worker's CLI; can also be deserialized from a config file.
#[derive(Deserialize, Clone, Debug, Parser)]
#[serde(default)]
pub struct ForkPoolConfig {
    #[arg(long, env = "FORK_POOL_FORK_URL", value_parser = parse_url, help_heading = "Fork Configuration")]
    /// Upstream RPC endpoint forks replay state from.
    pub fork_url: String,

    #[arg(long, default_value = DEFAULT_ANVIL_BIN, help_heading = "Fork Configuration")]
    /// Path to the `anvil` binary used to run forks.
    pub anvil_bin: String,

    #[arg(long, default_value_t = DEFAULT_CHAIN_ID, help_heading = "Fork Configuration")]
    /// Chain id reported by every fork.
    pub chain_id: u64,

    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, help_heading = "Fork Configuration")]
    /// Number of forks created per pool.
    pub pool_size: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_TIME_TO_ADVANCE,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "Fork Configuration"
    )]
    /// Seconds the pool is moved past the snapshot block's timestamp. At least one, a block
    /// can't share its parent's timestamp.
    #[serde(deserialize_with = "deserialize_time_to_advance")]
    pub time_to_advance: u64,

    #[arg(long = "unlocked-account", help_heading = "Fork Configuration")]
    /// Account that may send transactions without a signature (repeatable).
    #[serde(deserialize_with = "deserialize_addresses")]
    pub unlocked_accounts: Vec<Address>,

    #[arg(long, default_value_t = DEFAULT_GAS_PRICE, help_heading = "Fork Configuration")]
    /// Gas price forks run with.
    pub gas_price: u128,

    #[arg(long, default_value_t = DEFAULT_PORT_GRANT_TIMEOUT_SECS, help_heading = "Timeouts")]
    /// Seconds to wait for the coordinator to grant a port.
    pub port_grant_timeout: u64,

    #[arg(long, default_value_t = DEFAULT_FORK_START_TIMEOUT_SECS, help_heading = "Timeouts")]
    /// Seconds to wait for a fork to start listening.
    pub fork_start_timeout: u64,

    #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_SECS, help_heading = "Timeouts")]
    /// Seconds to wait for a single RPC round trip.
    pub rpc_timeout: u64,

    #[arg(long, default_value_t = DEFAULT_INCLUSION_TIMEOUT_SECS, help_heading = "Timeouts")]
    /// Seconds to wait for a submitted transaction to be mined.
    pub inclusion_timeout: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Info, help_heading = "Logging Configuration")]
    /// Log filter level.
    pub log_level: LogLevel,

    #[arg(long, help_heading = "Logging Configuration")]
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for ForkPoolConfig {
    fn default() -> Self {
        Self {
            fork_url: DEFAULT_FORK_URL.to_string(),
            anvil_bin: DEFAULT_ANVIL_BIN.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            pool_size: DEFAULT_POOL_SIZE,
            time_to_advance: DEFAULT_TIME_TO_ADVANCE,
            unlocked_accounts: Vec::new(),
            gas_price: DEFAULT_GAS_PRICE,
            port_grant_timeout: DEFAULT_PORT_GRANT_TIMEOUT_SECS,
            fork_start_timeout: DEFAULT_FORK_START_TIMEOUT_SECS,
            rpc_timeout: DEFAULT_RPC_TIMEOUT_SECS,
            inclusion_timeout: DEFAULT_INCLUSION_TIMEOUT_SECS,
            log_level: LogLevel::Info,
            log_json: false,
        }
    }
}

impl ForkPoolConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            port_grant: Duration::from_secs(self.port_grant_timeout),
            fork_start: Duration::from_secs(self.fork_start_timeout),
            rpc: Duration::from_secs(self.rpc_timeout),
            inclusion: Duration::from_secs(self.inclusion_timeout),
        }
    }
}

/// Upper bounds for every external wait the pool performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub port_grant: Duration,
    pub fork_start: Duration,
    pub rpc: Duration,
    pub inclusion: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        ForkPoolConfig::default().timeouts()
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

fn parse_url(raw: &str) -> Result<String, String> {
    url::Url::parse(raw)
        .map(|_| raw.to_string())
        .map_err(|err| format!("invalid fork url `{raw}`: {err}"))
}

fn deserialize_addresses<'de, D>(d: D) -> Result<Vec<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = Deserialize::deserialize(d)?;
    raw.iter()
        .map(|s| Address::from_str(s).map_err(serde::de::Error::custom))
        .collect()
}

fn deserialize_time_to_advance<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = u64::deserialize(d)?;
    if seconds == 0 {
        return Err(serde::de::Error::custom(
            "time_to_advance must be at least one second",
        ));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::{ForkPoolConfig, LogLevel};
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn parses_cli_flags() {
        let config = ForkPoolConfig::try_parse_from([
            "worker",
            "--fork-url",
            "https://eth.example.org",
            "--pool-size",
            "5",
            "--time-to-advance",
            "120",
            "--unlocked-account",
            "0x000000000000000000000000000000000000dEaD",
            "--unlocked-account",
            "0x000000000000000000000000000000000000bEEF",
            "--inclusion-timeout",
            "7",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.fork_url, "https://eth.example.org");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.time_to_advance, 120);
        assert_eq!(config.unlocked_accounts.len(), 2);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.timeouts().inclusion, Duration::from_secs(7));
        assert_eq!(config.anvil_bin, "anvil");
    }

    #[test]
    fn rejects_malformed_fork_url() {
        let result = ForkPoolConfig::try_parse_from(["worker", "--fork-url", "not a url"]);
        assert!(result.is_err());
    }

    #[test]
    fn deserializes_partial_file_with_defaults() {
        let config: ForkPoolConfig = serde_json::from_value(serde_json::json!({
            "fork_url": "http://localhost:8545",
            "chain_id": 10,
            "unlocked_accounts": ["0x000000000000000000000000000000000000dead"],
            "log_level": "warn",
        }))
        .unwrap();

        assert_eq!(config.chain_id, 10);
        assert_eq!(config.unlocked_accounts.len(), 1);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.pool_size, ForkPoolConfig::default().pool_size);
        assert_eq!(config.time_to_advance, 1);
    }

    #[test]
    fn time_to_advance_must_move_the_clock() {
        let parsed = ForkPoolConfig::try_parse_from([
            "worker",
            "--fork-url",
            "http://localhost:8545",
            "--time-to-advance",
            "0",
        ]);
        assert!(parsed.is_err());
        let defaulted =
            ForkPoolConfig::try_parse_from(["worker", "--fork-url", "http://localhost:8545"])
                .unwrap();
        assert_eq!(defaulted.time_to_advance, 1);

        let from_file = serde_json::from_value::<ForkPoolConfig>(serde_json::json!({
            "time_to_advance": 0,
        }));
        assert!(from_file.is_err());
    }
}
