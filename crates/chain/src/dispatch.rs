//! Smart-contract dispatch built on alloy's signer/provider setup,
//! generalized to dispatch by function name + JSON params (the callee
//! function varies per event rule) instead of one `sol!`-generated
//! binding per call.

use alloy::dyn_abi::DynSolValue;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{keccak256, Address, Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use relayer_core::error::DispatchError;
use relayer_core::traits::{Dispatcher, TxResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Custom Solidity error selectors we know how to name. Not
/// exhaustive; unrecognized selectors surface as `decoded_error_name: None`.
const KNOWN_CUSTOM_ERRORS: &[&str] = &[
    "InvalidOperationHash(bytes32)",
    "OperationAlreadyProcessed(bytes32)",
    "UnauthorizedRelayer(address)",
];

pub struct AlloyDispatcherConfig {
    pub rpc_urls: HashMap<u64, Vec<String>>,
    pub contract_addresses: HashMap<u64, Address>,
    pub private_keys: HashMap<u64, [u8; 32]>,
}

/// `Dispatcher` over alloy's signer + HTTP provider, caching one connected
/// provider per chain id.
pub struct AlloyDispatcher {
    config: AlloyDispatcherConfig,
    providers: RwLock<HashMap<u64, DynProvider>>,
}

impl AlloyDispatcher {
    pub fn new(config: AlloyDispatcherConfig) -> Self {
        Self {
            config,
            providers: RwLock::new(HashMap::new()),
        }
    }

    async fn provider_for(&self, chain_id: u64) -> Result<DynProvider, DispatchError> {
        if let Some(p) = self.providers.read().await.get(&chain_id) {
            return Ok(p.clone());
        }

        let urls = self
            .config
            .rpc_urls
            .get(&chain_id)
            .ok_or_else(|| DispatchError::BuildTxError {
                source: format!("no rpc url configured for chain_id={chain_id}"),
                decoded_error_name: None,
            })?;
        let private_key =
            self.config
                .private_keys
                .get(&chain_id)
                .ok_or_else(|| DispatchError::SignTxError(format!(
                    "no private key configured for chain_id={chain_id}"
                )))?;

        let signer = PrivateKeySigner::from_slice(private_key)
            .map_err(|e| DispatchError::SignTxError(e.to_string()))?
            .with_chain_id(Some(chain_id));
        let wallet = EthereumWallet::from(signer);

        let url = urls[0]
            .parse()
            .map_err(|e| DispatchError::BuildTxError {
                source: format!("invalid rpc url: {e}"),
                decoded_error_name: None,
            })?;

        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url).erased();
        self.providers.write().await.insert(chain_id, provider.clone());
        Ok(provider)
    }
}

fn field_address(params: &Value, key: &str) -> Result<Address, DispatchError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::BuildTxError {
            source: format!("missing param: {key}"),
            decoded_error_name: None,
        })?
        .parse()
        .map_err(|e| DispatchError::BuildTxError {
            source: format!("invalid address for {key}: {e}"),
            decoded_error_name: None,
        })
}

fn field_u256(params: &Value, key: &str) -> Result<U256, DispatchError> {
    let value = params.get(key).ok_or_else(|| DispatchError::BuildTxError {
        source: format!("missing param: {key}"),
        decoded_error_name: None,
    })?;
    let as_str = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(DispatchError::BuildTxError {
                source: format!("unexpected type for {key}: {other}"),
                decoded_error_name: None,
            })
        }
    };
    U256::from_str_radix(as_str.trim_start_matches("0x"), if as_str.starts_with("0x") { 16 } else { 10 })
        .map_err(|e| DispatchError::BuildTxError {
            source: format!("invalid uint256 for {key}: {e}"),
            decoded_error_name: None,
        })
}

/// Encodes `funcName(bytes32 operationHash, (address,address,uint256,uint256,string,uint256,uint256) params, uint256 blockStep)`.
fn encode_call(
    func_name: &str,
    operation_hash: [u8; 32],
    params: &Value,
    block_step: u64,
) -> Result<Bytes, DispatchError> {
    let signature =
        format!("{func_name}(bytes32,(address,address,uint256,uint256,string,uint256,uint256),uint256)");
    let selector = keccak256(signature.as_bytes());

    let token_name = params
        .get("tokenName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let encoded = DynSolValue::Tuple(vec![
        DynSolValue::FixedBytes(operation_hash.into(), 32),
        DynSolValue::Tuple(vec![
            DynSolValue::Address(field_address(params, "from")?),
            DynSolValue::Address(field_address(params, "to")?),
            DynSolValue::Uint(field_u256(params, "chainIdFrom")?, 256),
            DynSolValue::Uint(field_u256(params, "chainIdTo")?, 256),
            DynSolValue::String(token_name),
            DynSolValue::Uint(field_u256(params, "amount")?, 256),
            DynSolValue::Uint(field_u256(params, "nonce")?, 256),
        ]),
        DynSolValue::Uint(U256::from(block_step), 256),
    ])
    .abi_encode_params();

    let mut data = selector[..4].to_vec();
    data.extend(encoded);
    Ok(Bytes::from(data))
}

fn decode_custom_error(message: &str) -> Option<String> {
    let hex_start = message.find("0x")?;
    let hex = &message[hex_start + 2..];
    let bytes = hex::decode(hex.get(..8).unwrap_or(hex)).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    KNOWN_CUSTOM_ERRORS.iter().find_map(|sig| {
        let name = sig.split('(').next().unwrap_or(sig);
        let selector = keccak256(sig.as_bytes());
        (selector[..4] == bytes[..4]).then(|| name.to_string())
    })
}

#[async_trait]
impl Dispatcher for AlloyDispatcher {
    async fn execute(
        &self,
        chain_id: u64,
        operation_hash: [u8; 32],
        func_name: &str,
        params: Value,
        block_step: u64,
    ) -> Result<TxResult, DispatchError> {
        let provider = self.provider_for(chain_id).await?;
        let contract = *self
            .config
            .contract_addresses
            .get(&chain_id)
            .ok_or_else(|| DispatchError::BuildTxError {
                source: format!("no contract address configured for chain_id={chain_id}"),
                decoded_error_name: None,
            })?;

        let calldata = encode_call(func_name, operation_hash, &params, block_step)?;
        let tx = TransactionRequest::default().with_to(contract).with_input(calldata);

        let pending = provider.send_transaction(tx).await.map_err(|e| {
            let msg = e.to_string();
            DispatchError::BuildTxError {
                decoded_error_name: decode_custom_error(&msg),
                source: msg,
            }
        })?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| DispatchError::SendRawTxError(e.to_string()))?;

        if !receipt.status() {
            return Err(DispatchError::ContractExecFailed(format!(
                "tx {:#x} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(TxResult {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            block_hash: receipt
                .block_hash
                .map(|h| format!("{h:#x}"))
                .unwrap_or_default(),
            block_number: receipt.block_number.unwrap_or_default(),
            gas_used: receipt.gas_used,
            status: u64::from(receipt.status()),
        })
    }
}
