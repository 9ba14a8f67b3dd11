//! Request/response access to a node, shared by the HTTP client used for
//! one-shot queries and the per-socket WebSocket transport that serves
//! header fetches during reconciliation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// What a transport last saw of its node.
///
/// HTTP reports the outcome of its most recent exchange. A WebSocket
/// transport is healthy until its background task exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Nothing exchanged yet.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One JSON-RPC round trip at a time. [`EthClient`](crate::EthClient) is
/// built on top of it.
///
/// `send` returns a JSON-RPC error object as a successful response; only
/// [`RpcTransport::call`] turns it into [`TransportError::Rpc`]. Retrying is
/// up to the implementation.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Endpoint this transport talks to.
    fn url(&self) -> &str;

    /// `method(params)` with the result decoded into `T`.
    async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let resp = self.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::from)
    }
}
