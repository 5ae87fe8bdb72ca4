//! JSON-RPC over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde_json::Value;

use ledgerline_core::error::RpcError;
use ledgerline_core::traits::{ChainSource, ConnectionStatus, RpcTransport};
use ledgerline_core::types::ConnectionState;

use crate::chain;

/// Stateless request/response transport. Each call is bounded by the
/// client's request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(url)
            .map_err(map_client_error)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let mut array = ArrayParams::new();
        for param in params {
            array.insert(param)?;
        }
        self.client
            .request::<Value, _>(method, array)
            .await
            .map_err(map_client_error)
    }
}

impl ConnectionStatus for HttpTransport {
    fn state(&self) -> ConnectionState {
        ConnectionState::Open
    }
}

#[async_trait]
impl ChainSource for HttpTransport {
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        chain::fetch_block_hash(self, number).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        chain::fetch_latest_block_number(self).await
    }
}

fn map_client_error(e: ClientError) -> RpcError {
    match e {
        ClientError::Call(obj) => RpcError::Rpc {
            code: i64::from(obj.code()),
            message: obj.message().to_string(),
            data: obj.data().map(|raw| raw.get().to_string()),
        },
        ClientError::RequestTimeout => RpcError::Timeout,
        ClientError::ParseError(e) => RpcError::Decode(e.to_string()),
        other => RpcError::Transport(other.to_string()),
    }
}
