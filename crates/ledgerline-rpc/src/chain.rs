//! Block queries expressed over any [`RpcTransport`].

use serde_json::{Value, json};

use ledgerline_core::error::{ChainError, RpcError};
use ledgerline_core::traits::RpcTransport;
use ledgerline_core::types::{parse_quantity, to_quantity};

/// Canonical hash of block `number`, `None` when the node has no such block.
pub async fn fetch_block_hash<T>(transport: &T, number: u64) -> Result<Option<String>, RpcError>
where
    T: RpcTransport + ?Sized,
{
    let block = transport
        .send("eth_getBlockByNumber", &[json!(to_quantity(number)), json!(false)])
        .await?;
    if block.is_null() {
        return Ok(None);
    }
    let hash = block
        .get("hash")
        .and_then(Value::as_str)
        .ok_or(ChainError::MissingField("hash"))?;
    Ok(Some(hash.to_string()))
}

/// Current head height.
pub async fn fetch_latest_block_number<T>(transport: &T) -> Result<u64, RpcError>
where
    T: RpcTransport + ?Sized,
{
    let head = transport.send("eth_blockNumber", &[]).await?;
    let quantity = head.as_str().ok_or(ChainError::MissingField("result"))?;
    Ok(parse_quantity(quantity)?)
}
