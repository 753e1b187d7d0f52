//! Contract bindings and typed call requests
//!
//! A mirrored call is a tagged value (function + ordered typed arguments)
//! rather than a method looked up by name at runtime. The ABI loaded from the
//! metadata file is only used to check that the deployed contract declares the
//! items the relay depends on.

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};

use crate::types::{ChainSide, EventKind};

pub mod bridge;

pub use bridge::{DestinationBridge, SourceBridge};

/// A state-changing call on one of the bridge contracts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// `wrap(token, recipient, amount)` on the destination contract
    Wrap {
        token: Address,
        recipient: Address,
        amount: U256,
    },
    /// `withdraw(token, recipient, amount)` on the source contract
    Withdraw {
        token: Address,
        recipient: Address,
        amount: U256,
    },
}

impl ContractCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::Wrap { .. } => "wrap",
            ContractCall::Withdraw { .. } => "withdraw",
        }
    }

    /// Chain whose contract exposes this function
    pub fn target(&self) -> ChainSide {
        match self {
            ContractCall::Wrap { .. } => ChainSide::Destination,
            ContractCall::Withdraw { .. } => ChainSide::Source,
        }
    }

    /// ABI-encoded calldata (selector + arguments)
    pub fn calldata(&self) -> Bytes {
        match *self {
            ContractCall::Wrap {
                token,
                recipient,
                amount,
            } => DestinationBridge::wrapCall {
                token,
                recipient,
                amount,
            }
            .abi_encode()
            .into(),
            ContractCall::Withdraw {
                token,
                recipient,
                amount,
            } => SourceBridge::withdrawCall {
                token,
                recipient,
                amount,
            }
            .abi_encode()
            .into(),
        }
    }
}

/// topic0 of the given event kind
pub fn event_signature(kind: EventKind) -> B256 {
    match kind {
        EventKind::Deposit => SourceBridge::Deposit::SIGNATURE_HASH,
        EventKind::Unwrap => DestinationBridge::Unwrap::SIGNATURE_HASH,
    }
}

/// Indexed flags of the bridge events' inputs, in declaration order
const EVENT_INDEXED_LAYOUT: [bool; 3] = [true, true, false];

/// Check that a contract ABI declares the event and function the relay uses on
/// that side, with the signatures the bindings were generated from.
pub fn verify_abi(side: ChainSide, abi: &JsonAbi) -> Result<(), String> {
    let (event_name, topic, function_name, selector) = match side {
        ChainSide::Source => (
            "Deposit",
            SourceBridge::Deposit::SIGNATURE_HASH,
            "withdraw",
            SourceBridge::withdrawCall::SELECTOR,
        ),
        ChainSide::Destination => (
            "Unwrap",
            DestinationBridge::Unwrap::SIGNATURE_HASH,
            "wrap",
            DestinationBridge::wrapCall::SELECTOR,
        ),
    };

    let events = abi
        .events
        .get(event_name)
        .ok_or_else(|| format!("{side} ABI does not declare event {event_name}"))?;
    let matching: Vec<_> = events.iter().filter(|e| e.selector() == topic).collect();
    if matching.is_empty() {
        return Err(format!(
            "{side} ABI event {event_name} does not match {event_name}(address,address,uint256)"
        ));
    }
    // token and recipient are topics, amount is in the data section
    if !matching
        .iter()
        .any(|e| e.inputs.iter().map(|p| p.indexed).eq(EVENT_INDEXED_LAYOUT))
    {
        return Err(format!(
            "{side} ABI event {event_name} must index token and recipient but not amount"
        ));
    }

    let functions = abi
        .functions
        .get(function_name)
        .ok_or_else(|| format!("{side} ABI does not declare function {function_name}"))?;
    if !functions.iter().any(|f| f.selector().0 == selector) {
        return Err(format!(
            "{side} ABI function {function_name} does not match {function_name}(address,address,uint256)"
        ));
    }

    Ok(())
}

/// Minimal ABI JSON for one side, as found in the contract metadata file
#[cfg(any(test, feature = "testing"))]
pub fn abi_json(side: ChainSide) -> serde_json::Value {
    let (event, function) = match side {
        ChainSide::Source => ("Deposit", "withdraw"),
        ChainSide::Destination => ("Unwrap", "wrap"),
    };
    serde_json::json!([
        {
            "type": "event",
            "name": event,
            "anonymous": false,
            "inputs": [
                { "name": "token", "type": "address", "indexed": true },
                { "name": "recipient", "type": "address", "indexed": true },
                { "name": "amount", "type": "uint256", "indexed": false }
            ]
        },
        {
            "type": "function",
            "name": function,
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "token", "type": "address" },
                { "name": "recipient", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": []
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    #[test]
    fn test_event_signatures() {
        assert_eq!(
            event_signature(EventKind::Deposit),
            keccak256(b"Deposit(address,address,uint256)")
        );
        assert_eq!(
            event_signature(EventKind::Unwrap),
            keccak256(b"Unwrap(address,address,uint256)")
        );
    }

    #[test]
    fn test_wrap_calldata() {
        let call = ContractCall::Wrap {
            token: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            recipient: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            amount: U256::from(100u64),
        };
        let data = call.calldata();
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[..4], &keccak256(b"wrap(address,address,uint256)")[..4]);
        assert_eq!(&data[16..36], &[0xaa; 20]);
        assert_eq!(data[4 + 3 * 32 - 1], 100);
        assert_eq!(call.target(), ChainSide::Destination);
    }

    #[test]
    fn test_withdraw_selector() {
        let call = ContractCall::Withdraw {
            token: Address::ZERO,
            recipient: Address::ZERO,
            amount: U256::ZERO,
        };
        assert_eq!(
            &call.calldata()[..4],
            &keccak256(b"withdraw(address,address,uint256)")[..4]
        );
        assert_eq!(call.target(), ChainSide::Source);
    }

    #[test]
    fn test_verify_abi_accepts_matching_descriptor() {
        for side in ChainSide::ALL {
            let abi: JsonAbi = serde_json::from_value(abi_json(side)).unwrap();
            assert!(verify_abi(side, &abi).is_ok(), "{side} ABI should verify");
        }
    }

    #[test]
    fn test_verify_abi_rejects_other_side() {
        let abi: JsonAbi = serde_json::from_value(abi_json(ChainSide::Source)).unwrap();
        let err = verify_abi(ChainSide::Destination, &abi).unwrap_err();
        assert!(err.contains("Unwrap"), "{err}");
    }

    #[test]
    fn test_verify_abi_rejects_unindexed_event() {
        for side in ChainSide::ALL {
            let mut descriptor = abi_json(side);
            for input in descriptor[0]["inputs"].as_array_mut().unwrap() {
                input["indexed"] = serde_json::Value::Bool(false);
            }
            let abi: JsonAbi = serde_json::from_value(descriptor).unwrap();
            let err = verify_abi(side, &abi).unwrap_err();
            assert!(err.contains("index"), "{err}");
        }
    }

    #[test]
    fn test_verify_abi_rejects_indexed_amount() {
        let mut descriptor = abi_json(ChainSide::Destination);
        descriptor[0]["inputs"][2]["indexed"] = serde_json::Value::Bool(true);
        let abi: JsonAbi = serde_json::from_value(descriptor).unwrap();
        assert!(verify_abi(ChainSide::Destination, &abi).is_err());
    }

    #[test]
    fn test_verify_abi_rejects_wrong_signature() {
        let abi: JsonAbi = serde_json::from_value(serde_json::json!([
            {
                "type": "event",
                "name": "Deposit",
                "anonymous": false,
                "inputs": [
                    { "name": "token", "type": "address", "indexed": true },
                    { "name": "amount", "type": "uint256", "indexed": false }
                ]
            }
        ]))
        .unwrap();
        assert!(verify_abi(ChainSide::Source, &abi).is_err());
    }
}
