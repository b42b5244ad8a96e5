//! Contract ABI encoding for the bridge pair
//!
//! Source contract emits:
//! `event TokensDeposited(address indexed sender, address indexed recipient, uint256 amount)`
//!
//! Destination contract exposes:
//! `function mintBridgedTokens(address recipient, uint256 amount, bytes32 sourceTxHash)`
//!
//! The destination rejects a second mint for the same `sourceTxHash`.

use alloy_primitives::{Address, B256, U256, keccak256};

use super::error::LedgerError;
use super::types::{DepositPayload, TxHash};

pub const DEPOSIT_EVENT: &str = "TokensDeposited";
pub const DEPOSIT_EVENT_SIGNATURE: &str = "TokensDeposited(address,address,uint256)";
pub const MINT_SIGNATURE: &str = "mintBridgedTokens(address,uint256,bytes32)";

const WORD: usize = 32;

/// Canonical signature for an event name the relay understands
pub fn event_signature(event_name: &str) -> Option<&'static str> {
    match event_name {
        DEPOSIT_EVENT => Some(DEPOSIT_EVENT_SIGNATURE),
        _ => None,
    }
}

/// topic0 of an event
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// 4-byte function selector
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `mintBridgedTokens(recipient, amount, sourceTxHash)`
pub fn encode_mint(recipient: Address, amount: U256, source_tx: TxHash) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 3 * WORD);
    data.extend_from_slice(&selector(MINT_SIGNATURE));
    data.extend_from_slice(recipient.into_word().as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<WORD>());
    data.extend_from_slice(source_tx.as_slice());
    data
}

/// Decode a `TokensDeposited` log from its topics and data
pub fn decode_deposit(topics: &[B256], data: &[u8]) -> Result<DepositPayload, LedgerError> {
    let [topic0, sender, recipient] = topics else {
        return Err(LedgerError::Parse(format!(
            "{} expects 3 topics, got {}",
            DEPOSIT_EVENT,
            topics.len()
        )));
    };

    if *topic0 != event_topic(DEPOSIT_EVENT_SIGNATURE) {
        return Err(LedgerError::Parse(format!(
            "topic0 {} is not {}",
            topic0, DEPOSIT_EVENT
        )));
    }

    if data.len() < WORD {
        return Err(LedgerError::Parse(format!(
            "{} data too short: {} bytes",
            DEPOSIT_EVENT,
            data.len()
        )));
    }

    Ok(DepositPayload {
        sender: Address::from_word(*sender),
        recipient: Address::from_word(*recipient),
        amount: U256::from_be_slice(&data[..WORD]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_known_erc20_transfer() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_encode_mint_layout() {
        let recipient = Address::repeat_byte(0x11);
        let source_tx = TxHash::repeat_byte(0x22);
        let data = encode_mint(recipient, U256::from(500u64), source_tx);

        assert_eq!(data.len(), 4 + 96);
        assert_eq!(&data[..4], &selector(MINT_SIGNATURE));
        // address is left-padded to a full word
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..36], recipient.as_slice());
        // 500 = 0x01f4 in the last two bytes of the amount word
        assert_eq!(data[66], 0x01);
        assert_eq!(data[67], 0xf4);
        assert_eq!(&data[68..100], source_tx.as_slice());
    }

    #[test]
    fn test_decode_deposit() {
        let sender = Address::repeat_byte(0xaa);
        let recipient = Address::repeat_byte(0xbb);
        let topics = [
            event_topic(DEPOSIT_EVENT_SIGNATURE),
            sender.into_word(),
            recipient.into_word(),
        ];
        let data = U256::from(42u64).to_be_bytes::<32>();

        let payload = decode_deposit(&topics, &data).unwrap();
        assert_eq!(payload.sender, sender);
        assert_eq!(payload.recipient, recipient);
        assert_eq!(payload.amount, U256::from(42u64));
    }

    #[test]
    fn test_decode_rejects_foreign_or_short_logs() {
        let word = Address::repeat_byte(1).into_word();
        let data = [0u8; 32];

        assert!(decode_deposit(&[word, word, word], &data).is_err());
        assert!(decode_deposit(&[event_topic(DEPOSIT_EVENT_SIGNATURE)], &data).is_err());

        let topics = [event_topic(DEPOSIT_EVENT_SIGNATURE), word, word];
        assert!(decode_deposit(&topics, &data[..16]).is_err());
    }

    #[test]
    fn test_event_signature_lookup() {
        assert_eq!(event_signature("TokensDeposited"), Some(DEPOSIT_EVENT_SIGNATURE));
        assert_eq!(event_signature("Transfer"), None);
    }
}
