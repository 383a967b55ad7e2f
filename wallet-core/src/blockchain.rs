/// Core ledger types shared by the wallet components
///
/// Addresses, hashes and integers come from `ethers-core` so they line up with the
/// ABI codec; the structures below describe what this wallet reads from and
/// submits to the chain.
use crate::errors::{WalletError, WalletResult};
use ethers_core::abi::Token;
use ethers_core::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Inclusive window of block numbers scanned by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    from: U64,
    to: U64,
}

impl BlockRange {
    pub fn new(from: impl Into<U64>, to: impl Into<U64>) -> WalletResult<Self> {
        let from = from.into();
        let to = to.into();
        if from > to {
            return Err(WalletError::ValidationError(format!(
                "Block range start {} is past its end {}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    pub fn from_block(&self) -> U64 {
        self.from
    }

    pub fn to_block(&self) -> U64 {
        self.to
    }

    pub fn contains(&self, block: U64) -> bool {
        self.from <= block && block <= self.to
    }

    pub fn len(&self) -> u64 {
        (self.to - self.from).as_u64() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// A contract call or transaction before it is signed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
}

impl CallRequest {
    pub fn new(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to,
            data: data.into(),
            gas: None,
            gas_price: None,
        }
    }

    pub fn gas(mut self, gas: U256) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// The 4-byte function selector, if the payload carries one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let bytes = self.data.as_ref();
        if bytes.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&bytes[..4]);
        Some(selector)
    }
}

/// A contract log decoded against the emitting contract's ABI.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEvent {
    pub event: String,
    pub address: Address,
    pub block_number: Option<U64>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<U256>,
    pub return_values: BTreeMap<String, Token>,
}

impl LedgerEvent {
    pub fn value(&self, field: &str) -> Option<&Token> {
        self.return_values.get(field)
    }

    pub fn address_field(&self, field: &str) -> Option<Address> {
        self.value(field).cloned().and_then(Token::into_address)
    }

    pub fn uint_field(&self, field: &str) -> Option<U256> {
        self.value(field).cloned().and_then(Token::into_uint)
    }
}

/// Where a gas price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteSource {
    Network,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasQuote {
    pub price: U256,
    pub source: QuoteSource,
}

/// Result of a successful escrow deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub url: String,
    pub code: H256,
    pub amount: U256,
    pub sender: Address,
    pub receipt: TransactionReceipt,
}

impl PaymentLink {
    pub fn code_hex(&self) -> String {
        format!("0x{}", hex::encode(self.code.as_bytes()))
    }
}
