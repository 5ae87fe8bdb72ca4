//! Error types shared across Ledgerline crates.
use thiserror::Error;

/// Failures of a chain RPC call, whatever the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport: {0}")] Transport(String),
    #[error("rpc error {code}: {message}")] Rpc { code: i64, message: String, data: Option<String> },
    #[error("request timed out")] Timeout,
    #[error("connection closed")] ConnectionClosed,
    #[error("no active connection available")] NoActiveConnection,
    #[error("decode: {0}")] Decode(String),
}

impl RpcError {
    /// Whether retrying on another connection might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::ConnectionClosed | Self::NoActiveConnection
        )
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Malformed chain data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("invalid hex quantity: {0}")] InvalidQuantity(String),
    #[error("missing field: {0}")] MissingField(&'static str),
    #[error("invalid block status: {0}")] InvalidStatus(String),
}

impl From<ChainError> for RpcError {
    fn from(e: ChainError) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(RpcError::Timeout.is_transient());
        assert!(RpcError::NoActiveConnection.is_transient());
        assert!(RpcError::Transport("reset".into()).is_transient());
        assert!(!RpcError::Decode("bad".into()).is_transient());
        assert!(!RpcError::Rpc { code: -32000, message: "x".into(), data: None }.is_transient());
    }

    #[test]
    fn rpc_error_display() {
        let e = RpcError::Rpc { code: -32601, message: "method not found".into(), data: None };
        assert_eq!(e.to_string(), "rpc error -32601: method not found");
    }
}
