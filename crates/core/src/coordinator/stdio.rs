//! JSON-lines transport to a coordinator that spawned this process and owns its stdio.

use super::PortBroker;
use fork_pool_config::constants::SUPERVISOR_ENV;
use fork_pool_types::{CoreMessage, JobMessage};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Attaches to the supervising coordinator over stdin/stdout.
///
/// Without the supervisor environment variable the returned broker is unsupervised and every
/// port request fails with `NotASupervisedWorker`.
pub fn connect(grant_timeout: Duration) -> PortBroker {
    if std::env::var_os(SUPERVISOR_ENV).is_none() {
        tracing::debug!(
            env = SUPERVISOR_ENV,
            "not running under a coordinator; port allocation is unavailable"
        );
        return PortBroker::unsupervised(grant_timeout);
    }
    attach(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        grant_timeout,
    )
}

/// Spawns the reader and writer tasks serving a broker over an arbitrary byte stream, one JSON
/// envelope per line.
pub fn attach<R, W>(reader: R, writer: W, grant_timeout: Duration) -> PortBroker
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_messages(reader, inbound_tx));
    tokio::spawn(write_messages(writer, outbound_rx));
    PortBroker::new(Some(outbound_tx), inbound_rx, grant_timeout)
}

async fn read_messages<R: AsyncBufRead + Unpin>(
    reader: R,
    inbound: mpsc::UnboundedSender<CoreMessage>,
) {
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(%err, "failed to read from coordinator");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CoreMessage>(&line) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(%err, %line, "ignoring malformed coordinator message"),
        }
    }
    tracing::debug!("coordinator input closed");
}

async fn write_messages<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<JobMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(%err, "failed to encode coordinator message");
                continue;
            }
        };
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(err) = written.await {
            tracing::error!(%err, "failed to write to coordinator");
            break;
        }
    }
}
