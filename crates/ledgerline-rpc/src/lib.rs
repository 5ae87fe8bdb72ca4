//! # ledgerline-rpc — connectivity to the chain node.
//!
//! - [`heartbeat::HeartbeatSocket`]: one streaming connection kept honest by ping/pong
//! - [`pool::SocketPool`]: fixed set of sockets, dead ones replaced on a timer
//! - [`hedged::HedgedClient`]: request/response RPC with a duplicate request after a quick timeout
//! - [`retry::RetryingChain`]: chain reads retried until they succeed
//! - [`http::HttpTransport`]: JSON-RPC over HTTP
//! - [`chain`]: block queries shared by every transport

pub mod chain;
pub mod config;
pub mod hedged;
pub mod heartbeat;
pub mod http;
pub mod pool;
pub mod retry;

pub use config::{HedgeConfig, HeartbeatConfig, PoolConfig, RetryConfig};
pub use hedged::HedgedClient;
pub use heartbeat::HeartbeatSocket;
pub use http::HttpTransport;
pub use pool::SocketPool;
pub use retry::RetryingChain;
