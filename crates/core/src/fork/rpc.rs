//! Transport to a running fork.

use crate::error::RpcError;
use async_trait::async_trait;
use fork_pool_types::BlockHeader;
use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use std::time::Duration;

/// JSON-RPC endpoint of a fork.
#[async_trait]
pub trait ForkRpc: Send + Sync {
    /// Issues a single JSON-RPC call and returns the raw result.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    /// Opens an `eth_subscribe("newHeads")` subscription.
    async fn subscribe_new_heads(&self) -> Result<Box<dyn HeadSubscription>, RpcError>;
}

/// A live `newHeads` subscription.
#[async_trait]
pub trait HeadSubscription: Send {
    /// Waits for the next mined block. Returns `None` once the subscription is closed.
    async fn next_head(&mut self) -> Option<Result<BlockHeader, RpcError>>;

    /// Cancels the subscription (`eth_unsubscribe`).
    async fn unsubscribe(self: Box<Self>) -> Result<(), RpcError>;
}

/// [`ForkRpc`] over a websocket connection. Anvil serves websockets on its HTTP port.
pub struct WsForkRpc {
    client: WsClient,
}

impl WsForkRpc {
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = WsClientBuilder::default()
            .request_timeout(request_timeout)
            .build(url)
            .await?;
        Ok(Self { client })
    }
}

fn to_params(method: &str, params: Vec<Value>) -> Result<ArrayParams, RpcError> {
    let mut array = ArrayParams::new();
    for param in params {
        array.insert(param).map_err(|source| RpcError::Encode {
            method: method.to_string(),
            source,
        })?;
    }
    Ok(array)
}

#[async_trait]
impl ForkRpc for WsForkRpc {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let params = to_params(method, params)?;
        Ok(self.client.request::<Value, _>(method, params).await?)
    }

    async fn subscribe_new_heads(&self) -> Result<Box<dyn HeadSubscription>, RpcError> {
        let params = to_params("eth_subscribe", vec![Value::from("newHeads")])?;
        let subscription: Subscription<BlockHeader> = self
            .client
            .subscribe("eth_subscribe", params, "eth_unsubscribe")
            .await?;
        Ok(Box::new(subscription))
    }
}

#[async_trait]
impl HeadSubscription for Subscription<BlockHeader> {
    async fn next_head(&mut self) -> Option<Result<BlockHeader, RpcError>> {
        StreamExt::next(self).await.map(|header| {
            header.map_err(|source| RpcError::Decode {
                method: "eth_subscription".to_string(),
                source,
            })
        })
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), RpcError> {
        Ok(Subscription::unsubscribe(*self).await?)
    }
}
