use crate::serde_helpers::{b256_hex, u64_hex};
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

/// The subset of a block header the pool relies on. Delivered both by `newHeads` notifications
/// and by `eth_getBlockByNumber`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(with = "u64_hex")]
    pub number: u64,
    #[serde(with = "u64_hex")]
    pub timestamp: u64,
    #[serde(with = "b256_hex")]
    pub hash: B256,
}
