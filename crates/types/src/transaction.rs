use crate::serde_helpers::{address_hex, bytes_hex, u256_hex, u64_hex};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// An unsigned candidate transaction produced by a job strategy.
///
/// The same representation is used for `eth_sendTransaction` on a fork (where `from` must be an
/// unlocked account) and for the unsigned burst forwarded to the coordinator. Every numeric field
/// is encoded as a minimal `0x`-prefixed hex quantity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTransaction {
    #[serde(with = "address_hex")]
    pub from: Address,
    #[serde(
        with = "address_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<Address>,
    #[serde(with = "bytes_hex", default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(
        with = "u256_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<U256>,
    #[serde(
        with = "u64_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce: Option<u64>,
    #[serde(
        rename = "gas",
        alias = "gasLimit",
        with = "u256_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_limit: Option<U256>,
    #[serde(
        with = "u256_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_price: Option<U256>,
    #[serde(
        with = "u256_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_fee_per_gas: Option<U256>,
    #[serde(
        with = "u256_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(
        with = "u64_hex::opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chain_id: Option<u64>,
}

impl CandidateTransaction {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }

    pub fn gas_price(mut self, gas_price: impl Into<U256>) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }

    pub fn eip1559_fees(
        mut self,
        max_fee_per_gas: impl Into<U256>,
        max_priority_fee_per_gas: impl Into<U256>,
    ) -> Self {
        self.max_fee_per_gas = Some(max_fee_per_gas.into());
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas.into());
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Renders the transaction as the single parameter of `eth_sendTransaction`.
    pub fn to_rpc_object(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
