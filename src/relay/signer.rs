//! Relayer signing key
//!
//! Destination transactions are signed locally and broadcast raw, so the
//! relay knows each transaction hash before the node answers and can pin the
//! nonce it reuses across resubmissions.

use alloy_primitives::{Address, keccak256};
use ethers::signers::{LocalWallet, Signer as _};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{H160, TransactionRequest};
use std::fmt;

use super::error::LedgerError;
use super::ledger_client::ContractCall;
use super::types::TxHash;

/// Account that authorises destination transactions
#[derive(Clone)]
pub struct Signer {
    wallet: LocalWallet,
}

/// A signed, RLP-encoded transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    pub raw: Vec<u8>,
}

impl Signer {
    /// Hex private key, with or without `0x`
    pub fn from_private_key(key: &str) -> Result<Self, LedgerError> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| LedgerError::Parse(format!("Invalid private key: {}", e)))?;
        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        Address::from_slice(self.wallet.address().as_bytes())
    }

    /// Legacy transaction for `call` at `gas_price` wei, signed for `chain_id`
    pub async fn sign_call(
        &self,
        call: &ContractCall,
        chain_id: u64,
        gas_price: u128,
    ) -> Result<SignedTransaction, LedgerError> {
        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let tx: TypedTransaction = TransactionRequest::new()
            .from(wallet.address())
            .to(H160::from_slice(call.to.as_slice()))
            .data(call.data.clone())
            .gas(call.gas_limit)
            .gas_price(gas_price)
            .nonce(call.nonce)
            .value(0u64)
            .chain_id(chain_id)
            .into();

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| LedgerError::Parse(format!("Signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature).to_vec();

        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw,
        })
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
