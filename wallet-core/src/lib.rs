// lib.rs - Core library structure for the wallet

pub mod accounts;
pub mod blockchain;
pub mod blockchain_client;
pub mod config_store;
pub mod contracts;
pub mod errors;
pub mod gas;
pub mod mock_ledger;
pub mod payments;
pub mod poller;
pub mod queries;
pub mod transactions;
pub mod transfers;
pub mod validation;
pub mod wallet;

#[cfg(test)]
mod test_support;

// Re-export common types
pub use accounts::{generate_mnemonic, AccountSet, AccountUsage};
pub use blockchain::{BlockRange, CallRequest, GasQuote, LedgerEvent, PaymentLink, QuoteSource};
pub use blockchain_client::{LedgerClient, RpcLedgerClient};
pub use config_store::{ConfigStore, NetworkConfig, WalletConfig};
pub use contracts::{ContractBinding, ContractRegistry, ContractRole};
pub use errors::{WalletError, WalletResult};
pub use poller::{EventFilter, PollBatch, PollPhase, Subscription};
pub use validation::InputValidator;
pub use wallet::{BalanceChange, BalanceDirection, BalanceSubscriptions, Wallet};
