//! Error taxonomy. Each subsystem gets one `thiserror` enum;
//! callers pattern-match where the algorithm branches on error kind and
//! otherwise propagate with `?` / `anyhow::Context`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file missing: {0}")]
    FileMissing(String),
    #[error("ABI file missing or unreadable: {0}")]
    AbiMissing(String),
    #[error("blockchain config missing for chain_id={0}")]
    BlockchainDataMissing(u64),
    #[error("relayer_register config missing or incomplete: {0}")]
    RegisterDataMissing(String),
    #[error("no event rule configured for event {0}")]
    EventRuleKeyError(String),
    #[error("placeholder substitution failed: {0}")]
    PlaceholderTypeError(String),
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository get failed: {0}")]
    Get(String),
    #[error("repository save failed: {0}")]
    Save(String),
    #[error("repository delete failed: {0}")]
    Delete(String),
    #[error("repository database not provided")]
    DatabaseNotProvided,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no events found")]
    EventsNotFound,
    #[error("log is in a pending block (log_index is null)")]
    ErrorBlockPending,
    #[error("exhausted retries fetching logs for range [{start}, {end}]")]
    FetchEventOutOfRetries { start: u64, end: u64 },
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("client_version call failed: {0}")]
    ClientVersionError(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to build transaction: {source}{}", decoded_error_name.as_ref().map(|n| format!(" (decoded custom error: {n})")).unwrap_or_default())]
    BuildTxError {
        source: String,
        decoded_error_name: Option<String>,
    },
    #[error("failed to sign transaction: {0}")]
    SignTxError(String),
    #[error("failed to broadcast raw transaction: {0}")]
    SendRawTxError(String),
    #[error("contract execution failed (receipt status=0): {0}")]
    ContractExecFailed(String),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("block finality wait exceeded allocated time")]
    BlockFinalityTimeExceeded,
    #[error("failed to calculate block finality: {0}")]
    CalculateBlockFinalityError(String),
    #[error("block validation failed: {0}")]
    BlockValidationFailed(String),
    #[error("block validity error: {0}")]
    BlockValidityError(String),
    #[error("bridge task has invalid status: {0}")]
    BridgeTaskInvalidStatus(String),
    #[error("event payload could not be converted: {0}")]
    EventConverterTypeError(String),
    #[error("failed to execute dependent smart contract call: {0}")]
    DispatchFailed(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to register event on queue: {0}")]
    RegisterFailed(String),
    #[error("failed to read events from queue: {0}")]
    ReadEventFailed(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC call failed: {0}")]
    Rpc(String),
}
