//! Event ABI and custom-error selectors, decoded with alloy's `sol!` macro.

use alloy::primitives::{keccak256, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolEvent, SolEventInterface};
use relayer_core::error::ScanError;
use relayer_core::event::{EventName, EventPayload};
use relayer_core::traits::RawLog;

sol! {
    interface BridgeEvents {
        event OperationCreated(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
        event FeesDeposited(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
        event FeesDepositConfirmed(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
        event FeesLockedConfirmed(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
        event FeesLockedAndDepositConfirmed(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
        event OperationFinalized(bytes32 operationHash, address from, address to, uint256 chainIdFrom, uint256 chainIdTo, string tokenName, uint256 amount, uint256 nonce, bytes signature);
    }
}

/// All six topic0 signatures the scanner subscribes to.
pub fn event_topics() -> Vec<String> {
    EventName::ALL
        .iter()
        .map(|name| format!("0x{}", hex::encode(topic0_for(*name))))
        .collect()
}

fn topic0_for(name: EventName) -> B256 {
    let signature = "(bytes32,address,address,uint256,uint256,string,uint256,uint256,bytes)";
    keccak256(format!("{}{signature}", name.as_str()).as_bytes())
}

/// Decodes a raw log into `(EventName, EventPayload)`, matching the event's
/// topic0 against the known signatures. `block_step` is the log's own block
/// number, used as the finality baseline for the triggering block.
pub fn decode_log(log: &RawLog) -> anyhow::Result<(EventName, EventPayload)> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| anyhow::anyhow!("log has no topics"))?;
    let topic0_bytes: B256 = topic0.parse().map_err(|e| anyhow::anyhow!("bad topic0: {e}"))?;

    for name in EventName::ALL {
        if topic0_bytes == topic0_for(name) {
            let decoded = BridgeEvents::BridgeEventsEvents::decode_raw_log(
                std::iter::once(topic0_bytes),
                &log.data,
            )
            .map_err(|e| anyhow::anyhow!("decode {name} log: {e}"))?;
            return Ok((name, payload_from_decoded(decoded, log.block_number)));
        }
    }

    Err(ScanError::EventsNotFound.into())
}

fn payload_from_decoded(
    decoded: BridgeEvents::BridgeEventsEvents,
    block_step: u64,
) -> EventPayload {
    macro_rules! build {
        ($ev:expr) => {{
            let ev = $ev;
            EventPayload::new(
                ev.from,
                ev.to,
                u256_to_u64(ev.chainIdFrom),
                u256_to_u64(ev.chainIdTo),
                ev.tokenName.clone(),
                ev.amount,
                u256_to_u64(ev.nonce),
                ev.signature.to_vec(),
                ev.operationHash.0,
                block_step,
            )
        }};
    }

    use BridgeEvents::BridgeEventsEvents::*;
    match decoded {
        OperationCreated(ev) => build!(ev),
        FeesDeposited(ev) => build!(ev),
        FeesDepositConfirmed(ev) => build!(ev),
        FeesLockedConfirmed(ev) => build!(ev),
        FeesLockedAndDepositConfirmed(ev) => build!(ev),
        OperationFinalized(ev) => build!(ev),
    }
}

fn u256_to_u64(value: U256) -> u64 {
    value.try_into().unwrap_or(u64::MAX)
}

/// `keccak256("Name(...)")[..4]`, used to decode custom Solidity errors
/// returned from a reverted `eth_call`.
pub fn custom_error_selector(name: &str, arg_types: &str) -> [u8; 4] {
    let hash = keccak256(format!("{name}{arg_types}").as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_topics_are_unique_and_well_formed() {
        let topics = event_topics();
        assert_eq!(topics.len(), 6);
        let mut sorted = topics.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 6);
        for t in topics {
            assert!(t.starts_with("0x"));
            assert_eq!(t.len(), 66);
        }
    }

    #[test]
    fn custom_error_selector_is_four_bytes() {
        let sel = custom_error_selector("InvalidOperationHash", "(bytes32)");
        assert_eq!(sel.len(), 4);
    }
}
