//! Moving a fork's clock and height forward.
//!
//! Mining is stateful: blocks are always mined one after another, never concurrently.

use crate::error::{RpcError, TimeError};
use crate::fork::Fork;
use fork_pool_types::BlockHeader;
use serde_json::Value;

/// Mines exactly one empty block.
pub async fn advance_block(fork: &Fork) -> Result<(), RpcError> {
    fork.call::<Value>("evm_mine", vec![]).await?;
    fork.observe_mined(1, None);
    Ok(())
}

/// Mines `amount` blocks, one after another.
pub async fn advance_blocks(fork: &Fork, amount: u64) -> Result<(), RpcError> {
    for _ in 0..amount {
        advance_block(fork).await?;
    }
    Ok(())
}

/// Shifts the fork's clock forward by `seconds` without mining.
pub async fn advance_time(fork: &Fork, seconds: u64) -> Result<(), RpcError> {
    fork.call::<Value>("evm_increaseTime", vec![Value::from(seconds)])
        .await?;
    Ok(())
}

/// Shifts the clock forward by `seconds`, then mines one block carrying the shifted timestamp.
pub async fn advance_time_and_block(fork: &Fork, seconds: u64) -> Result<(), RpcError> {
    advance_time(fork, seconds).await?;
    advance_block(fork).await
}

/// Mines one block whose timestamp is pinned to `timestamp`, in a single round trip.
///
/// The timestamp must be strictly after the last one observed on this fork, as a block can't
/// share its parent's timestamp.
pub async fn advance_to_time_and_block(fork: &Fork, timestamp: u64) -> Result<(), TimeError> {
    if let Some(current) = fork.clock().timestamp {
        if timestamp <= current {
            return Err(TimeError::NotInFuture {
                requested: timestamp,
                current,
            });
        }
    }
    fork.call::<Value>("evm_mine", vec![Value::from(timestamp)])
        .await?;
    fork.observe_mined(1, Some(timestamp));
    Ok(())
}

/// Reads the header of block `number`.
pub async fn block_by_number(fork: &Fork, number: u64) -> Result<BlockHeader, TimeError> {
    let header: Option<BlockHeader> = fork
        .call(
            "eth_getBlockByNumber",
            vec![Value::from(format!("0x{number:x}")), Value::from(false)],
        )
        .await?;
    let header = header.ok_or(TimeError::UnknownBlock(number))?;
    fork.observe(&header);
    Ok(header)
}

/// Reads the header of the fork's latest block.
pub async fn latest_block(fork: &Fork) -> Result<BlockHeader, RpcError> {
    let header: BlockHeader = fork
        .call(
            "eth_getBlockByNumber",
            vec![Value::from("latest"), Value::from(false)],
        )
        .await?;
    fork.observe(&header);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_fork, BLOCK_TIME, SNAPSHOT_BLOCK, SNAPSHOT_TIMESTAMP};
    use test_case::test_case;

    #[tokio::test]
    async fn advance_block_mines_one_block() -> anyhow::Result<()> {
        let (fork, engine) = mock_fork(9000);

        advance_block(&fork).await?;

        let head = latest_block(&fork).await?;
        assert_eq!(head.number, SNAPSHOT_BLOCK + 1);
        assert_eq!(engine.calls_to("evm_mine"), 1);
        assert_eq!(fork.clock().height, Some(SNAPSHOT_BLOCK + 1));
        Ok(())
    }

    #[test_case(0 ; "no blocks")]
    #[test_case(1 ; "one block")]
    #[test_case(5 ; "five blocks")]
    #[tokio::test]
    async fn advance_blocks_increases_height_by_exactly_n(n: u64) -> anyhow::Result<()> {
        let (fork, engine) = mock_fork(9000);

        advance_blocks(&fork, n).await?;

        assert_eq!(latest_block(&fork).await?.number, SNAPSHOT_BLOCK + n);
        assert_eq!(engine.calls_to("evm_mine"), n as usize);
        Ok(())
    }

    #[tokio::test]
    async fn advance_blocks_matches_sequential_single_advances() -> anyhow::Result<()> {
        let (batched, _) = mock_fork(9000);
        let (single, _) = mock_fork(9001);

        advance_blocks(&batched, 3).await?;
        for _ in 0..3 {
            advance_block(&single).await?;
        }

        assert_eq!(latest_block(&batched).await?, latest_block(&single).await?);
        Ok(())
    }

    #[tokio::test]
    async fn advance_time_does_not_mine() -> anyhow::Result<()> {
        let (fork, _) = mock_fork(9000);

        advance_time(&fork, 600).await?;

        let head = latest_block(&fork).await?;
        assert_eq!(head.number, SNAPSHOT_BLOCK);
        assert_eq!(head.timestamp, SNAPSHOT_TIMESTAMP);
        Ok(())
    }

    #[tokio::test]
    async fn advance_time_and_block_carries_the_shift() -> anyhow::Result<()> {
        let (fork, _) = mock_fork(9000);

        advance_time_and_block(&fork, 600).await?;

        let head = latest_block(&fork).await?;
        assert_eq!(head.number, SNAPSHOT_BLOCK + 1);
        assert!(head.timestamp >= SNAPSHOT_TIMESTAMP + 600);
        Ok(())
    }

    #[tokio::test]
    async fn advance_to_time_and_block_pins_timestamp() -> anyhow::Result<()> {
        let (fork, engine) = mock_fork(9000);

        advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 120).await?;

        let head = latest_block(&fork).await?;
        assert_eq!(head.number, SNAPSHOT_BLOCK + 1);
        assert_eq!(head.timestamp, SNAPSHOT_TIMESTAMP + 120);
        assert_eq!(engine.calls_to("evm_mine"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn clock_never_moves_backward() -> anyhow::Result<()> {
        let (fork, engine) = mock_fork(9000);
        advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 120).await?;

        let err = advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 60)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimeError::NotInFuture { requested, current }
                if requested == SNAPSHOT_TIMESTAMP + 60 && current == SNAPSHOT_TIMESTAMP + 120
        ));
        // Rejected locally, the engine never saw the second call
        assert_eq!(engine.calls_to("evm_mine"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn repeating_the_current_timestamp_is_rejected() -> anyhow::Result<()> {
        let (fork, engine) = mock_fork(9000);
        advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 120).await?;

        let err = advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 120)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimeError::NotInFuture { requested, current }
                if requested == current && current == SNAPSHOT_TIMESTAMP + 120
        ));
        assert_eq!(engine.calls_to("evm_mine"), 1);
        assert_eq!(latest_block(&fork).await?.number, SNAPSHOT_BLOCK + 1);
        Ok(())
    }

    #[tokio::test]
    async fn engine_rejects_a_stale_timestamp_the_fork_has_not_observed() {
        let (fork, engine) = mock_fork(9000);

        let err = advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimeError::Rpc(RpcError::Engine { code: -32000, .. })
        ));
        assert_eq!(engine.calls_to("evm_mine"), 1);
    }

    #[tokio::test]
    async fn chain_never_moves_backward_after_unpinned_mining() -> anyhow::Result<()> {
        let (fork, _) = mock_fork(9000);
        advance_time_and_block(&fork, 100).await?;
        // The mined timestamp was never read back, so only the engine can tell
        assert_eq!(fork.clock().timestamp, None);

        let err = advance_to_time_and_block(&fork, SNAPSHOT_TIMESTAMP + 50)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TimeError::Rpc(RpcError::Engine { code: -32000, .. })
        ));
        let head = latest_block(&fork).await?;
        assert_eq!(head.number, SNAPSHOT_BLOCK + 1);
        assert_eq!(head.timestamp, SNAPSHOT_TIMESTAMP + BLOCK_TIME + 100);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_block_is_reported() {
        let (fork, _) = mock_fork(9000);

        let err = block_by_number(&fork, SNAPSHOT_BLOCK + 50).await.unwrap_err();

        assert!(matches!(err, TimeError::UnknownBlock(n) if n == SNAPSHOT_BLOCK + 50));
    }
}
