use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalletError {
    // Cryptographic errors
    CryptoError(String),
    InvalidKey(String),
    SignatureError(String),

    // Network errors
    NetworkError(String),
    ConnectionTimeout,
    InvalidResponse(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),
    InsufficientFunds(String),

    // Contract and transaction errors
    ConfigurationError(String),
    ContractError(String),
    EstimationError(String),
    SubmissionError(String),
    QuoteFetchError(String),
    PollFetchError(String),

    // Application errors
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl WalletError {
    /// Errors raised before anything was sent to the ledger.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::ValidationError(_)
                | WalletError::InvalidAddress(_)
                | WalletError::InvalidAmount(_)
                | WalletError::InsufficientFunds(_)
        )
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            WalletError::SignatureError(msg) => write!(f, "Signature error: {}", msg),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::ConnectionTimeout => write!(f, "Connection timeout"),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            WalletError::InsufficientFunds(msg) => write!(f, "Insufficient funds: {}", msg),

            WalletError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            WalletError::ContractError(msg) => write!(f, "Contract error: {}", msg),
            WalletError::EstimationError(msg) => write!(f, "Gas estimation failed: {}", msg),
            WalletError::SubmissionError(msg) => write!(f, "Transaction submission failed: {}", msg),
            WalletError::QuoteFetchError(msg) => write!(f, "Gas price fetch failed: {}", msg),
            WalletError::PollFetchError(msg) => write!(f, "Event poll failed: {}", msg),

            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<ethers_core::abi::Error> for WalletError {
    fn from(error: ethers_core::abi::Error) -> Self {
        WalletError::ContractError(format!("ABI error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            WalletError::ConnectionTimeout
        } else {
            WalletError::NetworkError(format!("HTTP request failed: {}", error))
        }
    }
}
