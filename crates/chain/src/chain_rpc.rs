use crate::rpc::{format_quantity, parse_quantity_u64, RpcClient};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use relayer_core::error::ChainError;
use relayer_core::traits::{ChainRpc, RawLog};
use serde_json::{json, Value};

/// `ChainRpc` over raw JSON-RPC, using `RpcClient`'s request/retry shape
/// instead of a full web3 client.
pub struct JsonRpcChain {
    client: RpcClient,
}

impl JsonRpcChain {
    pub fn new(urls: Vec<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: RpcClient::new(urls)?,
        })
    }
}

fn to_chain_error(e: anyhow::Error) -> ChainError {
    ChainError::Rpc(e.to_string())
}

#[async_trait]
impl ChainRpc for JsonRpcChain {
    async fn current_block_number(&self) -> Result<u64, ChainError> {
        let v = self
            .client
            .request("eth_blockNumber", json!([]))
            .await
            .map_err(to_chain_error)?;
        parse_quantity_u64(v).map_err(to_chain_error)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>, ChainError> {
        let v = self
            .client
            .request(
                "eth_getBlockByNumber",
                json!([format_quantity(block_number), false]),
            )
            .await
            .map_err(to_chain_error)?;
        if v.is_null() {
            return Ok(None);
        }
        let ts = v
            .get("timestamp")
            .cloned()
            .ok_or_else(|| ChainError::Rpc("block missing timestamp".to_string()))?;
        let secs = parse_quantity_u64(ts).map_err(to_chain_error)?;
        Ok(Utc.timestamp_opt(secs as i64, 0).single())
    }

    async fn get_logs(
        &self,
        address: &str,
        topics: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = json!({
            "address": address,
            "topics": [topics],
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
        });
        let v = self
            .client
            .request("eth_getLogs", json!([filter]))
            .await
            .map_err(to_chain_error)?;
        let entries = v
            .as_array()
            .ok_or_else(|| ChainError::Rpc("eth_getLogs did not return an array".to_string()))?;

        entries.iter().map(parse_log_entry).collect()
    }

    async fn account_address(&self) -> Result<String, ChainError> {
        let v = self
            .client
            .request("eth_accounts", json!([]))
            .await
            .map_err(to_chain_error)?;
        v.as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ChainError::Rpc("eth_accounts returned no address".to_string()))
    }

    async fn transaction_count(&self, address: &str) -> Result<u64, ChainError> {
        let v = self
            .client
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await
            .map_err(to_chain_error)?;
        parse_quantity_u64(v).map_err(to_chain_error)
    }

    async fn client_version(&self) -> Result<String, ChainError> {
        let v = self
            .client
            .request("web3_clientVersion", json!([]))
            .await
            .map_err(to_chain_error)?;
        v.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ChainError::Rpc("web3_clientVersion returned non-string".to_string()))
    }
}

fn parse_log_entry(v: &Value) -> Result<RawLog, ChainError> {
    let block_number = v
        .get("blockNumber")
        .cloned()
        .ok_or_else(|| ChainError::Rpc("log missing blockNumber".to_string()))
        .and_then(|v| parse_quantity_u64(v).map_err(to_chain_error))?;
    let tx_hash = v
        .get("transactionHash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ChainError::Rpc("log missing transactionHash".to_string()))?
        .to_string();
    // `null` log_index marks a pending (unconfirmed) log; callers treat
    // that as `ScanError::ErrorBlockPending`.
    let log_index = match v.get("logIndex") {
        Some(Value::Null) | None => None,
        Some(other) => Some(parse_quantity_u64(other.clone()).map_err(to_chain_error)?),
    };
    let topics = v
        .get("topics")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let data_hex = v.get("data").and_then(|v| v.as_str()).unwrap_or("0x");
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| ChainError::Rpc(format!("bad log data hex: {e}")))?;

    Ok(RawLog {
        block_number,
        tx_hash,
        log_index,
        topics,
        data,
    })
}
