use crate::serde_helpers::{address_hex, b256_hex, u256_hex, u64_hex};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Receipt of a transaction executed on a fork, as returned by `eth_getTransactionReceipt`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkReceipt {
    #[serde(with = "b256_hex")]
    pub transaction_hash: B256,
    #[serde(with = "u64_hex")]
    pub block_number: u64,
    #[serde(with = "b256_hex")]
    pub block_hash: B256,
    #[serde(with = "u256_hex")]
    pub gas_used: U256,
    /// `1` for success, `0` for failure (EIP-658).
    #[serde(with = "u64_hex")]
    pub status: u64,
    #[serde(with = "address_hex")]
    pub from: Address,
    #[serde(with = "address_hex::opt", default)]
    pub to: Option<Address>,
    #[serde(with = "address_hex::opt", default)]
    pub contract_address: Option<Address>,
}

impl ForkReceipt {
    pub fn succeeded(&self) -> bool {
        self.status != 0
    }
}
