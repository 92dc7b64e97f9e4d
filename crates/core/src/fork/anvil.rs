use super::{Fork, ForkEnv, ForkLauncher, ForkOptions, ForkRpc, WsForkRpc};
use crate::error::{ForkStartError, RpcError};
use anyhow::Context;
use async_trait::async_trait;
use fork_pool_config::constants::FORK_READINESS_POLL_INTERVAL_MS;
use fork_pool_config::{ForkPoolConfig, Timeouts};
use semver::Version;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child as AsyncChild, Command as AsyncCommand};
use tokio::sync::OnceCell;

/// Launches every fork as its own `anvil` process.
pub struct AnvilLauncher {
    bin: String,
    timeouts: Timeouts,
    version_checked: OnceCell<()>,
}

impl AnvilLauncher {
    pub fn new(bin: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            bin: bin.into(),
            timeouts,
            version_checked: OnceCell::new(),
        }
    }

    pub fn from_config(config: &ForkPoolConfig) -> Self {
        Self::new(config.anvil_bin.clone(), config.timeouts())
    }

    async fn ensure_supported(&self) -> Result<(), ForkStartError> {
        self.version_checked
            .get_or_try_init(|| async {
                ensure_anvil_1_x_x(&self.bin)
                    .await
                    .map_err(|err| ForkStartError::UnsupportedEngine {
                        bin: self.bin.clone(),
                        reason: format!("{err:#}"),
                    })
            })
            .await
            .map(|_| ())
    }
}

async fn ensure_anvil_1_x_x(bin: &str) -> anyhow::Result<()> {
    let child = AsyncCommand::new(bin)
        .arg("--version")
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| {
            format!("could not detect `{bin}` version; make sure it is installed on your machine")
        })?;
    let output = child.wait_with_output().await?;
    let output = std::str::from_utf8(&output.stdout)?;
    let version_line = output
        .lines()
        .next()
        .with_context(|| format!("`{bin} --version` output did not contain any lines: {output}"))?;
    let version = version_line
        .strip_prefix("anvil Version: ")
        .with_context(|| {
            format!("`{bin} --version` output started with unexpected prefix: {version_line}")
        })?;
    let version = Version::parse(version)?;
    tracing::debug!(%version, "detected installed anvil version");
    // Allow any version above `1.0.0-rc` (including `1.0.0-stable`)
    if version > Version::parse("1.0.0-rc")? {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "unsupported `anvil` version ({}), please upgrade to >1.0.0-rc",
            version
        ))
    }
}

fn anvil_args(options: &ForkOptions) -> Vec<String> {
    vec![
        "--host".to_string(),
        "127.0.0.1".to_string(),
        "--port".to_string(),
        options.port.to_string(),
        "--fork-url".to_string(),
        options.fork_url.clone(),
        "--fork-block-number".to_string(),
        options.fork_block_number.to_string(),
        "--gas-limit".to_string(),
        options.gas_limit.to_string(),
        "--gas-price".to_string(),
        options.gas_price.to_string(),
        // Keeps the base fee from outgrowing the gas price as blocks are mined
        "--block-base-fee-per-gas".to_string(),
        options.gas_price.to_string(),
        "--chain-id".to_string(),
        options.chain_id.to_string(),
    ]
}

#[async_trait]
impl ForkLauncher for AnvilLauncher {
    async fn start(&self, options: ForkOptions) -> Result<Fork, ForkStartError> {
        self.ensure_supported().await?;

        let port = options.port;
        tracing::info!(
            port,
            block = options.fork_block_number,
            log_id = options.log_id.as_deref(),
            "fork started"
        );

        let mut child = AsyncCommand::new(&self.bin)
            .args(anvil_args(&options))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ForkStartError::Spawn { port, source })?;

        let rpc = wait_until_listening(&mut child, port, &self.timeouts).await?;
        let fork = Fork::new(
            &options,
            Arc::new(rpc),
            self.timeouts,
            ForkEnv::Process(ProcessFork { child }),
        );

        for account in &options.unlocked_accounts {
            fork.call::<Value>(
                "anvil_impersonateAccount",
                vec![Value::from(account.to_string())],
            )
            .await
            .map_err(|source| ForkStartError::Rpc { port, source })?;
        }

        tracing::info!(
            port,
            block = options.fork_block_number,
            log_id = options.log_id.as_deref(),
            "fork initialized"
        );
        Ok(fork)
    }
}

async fn wait_until_listening(
    child: &mut AsyncChild,
    port: u16,
    timeouts: &Timeouts,
) -> Result<WsForkRpc, ForkStartError> {
    let url = format!("ws://127.0.0.1:{port}");
    tokio::time::timeout(timeouts.fork_start, async {
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|source| ForkStartError::Spawn { port, source })?
            {
                return Err(ForkStartError::Exited { port, status });
            }
            match try_connect(&url, timeouts.rpc).await {
                Ok(rpc) => return Ok(rpc),
                Err(err) => {
                    tracing::debug!(port, %err, "fork is not up yet; sleeping");
                    tokio::time::sleep(Duration::from_millis(FORK_READINESS_POLL_INTERVAL_MS))
                        .await;
                }
            }
        }
    })
    .await
    .map_err(|_| ForkStartError::Timeout {
        port,
        timeout: timeouts.fork_start,
    })?
}

async fn try_connect(url: &str, request_timeout: Duration) -> Result<WsForkRpc, RpcError> {
    let rpc = WsForkRpc::connect(url, request_timeout).await?;
    rpc.request("eth_chainId", vec![]).await?;
    Ok(rpc)
}

/// An `anvil` process serving one fork.
pub struct ProcessFork {
    child: AsyncChild,
}

impl ProcessFork {
    pub(super) async fn kill(mut self, port: u16) {
        if let Err(err) = self.child.kill().await {
            tracing::warn!(port, %err, "failed to kill fork process");
        }
    }
}
