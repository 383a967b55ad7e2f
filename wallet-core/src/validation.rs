use crate::errors::{WalletError, WalletResult};
use ethers_core::types::{Address, U256};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::str::FromStr;

static SHARED_VALIDATOR: OnceCell<InputValidator> = OnceCell::new();

/// Process-wide validator, compiled on first use
pub fn shared_validator() -> WalletResult<&'static InputValidator> {
    SHARED_VALIDATOR.get_or_try_init(InputValidator::new)
}

/// Input validation utilities for the wallet
pub struct InputValidator {
    // Compiled regex patterns for performance
    address_pattern: Regex,
    endpoint_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let endpoint_pattern = Regex::new(r"^https?://[^\s/$.?#].[^\s]*$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid endpoint regex: {}", e)))?;

        // Common malicious patterns to block
        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                WalletError::ValidationError(format!("Invalid security regex: {}", e))
            })
        })
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            address_pattern,
            endpoint_pattern,
            malicious_patterns,
        })
    }

    /// Validate a ledger address string
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(WalletError::InvalidAddress(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::InvalidAddress(format!(
                "'{}' is not a 0x-prefixed 20-byte hex address",
                address
            )));
        }

        Ok(())
    }

    /// Validate and parse a ledger address string
    pub fn parse_address(&self, address: &str) -> WalletResult<Address> {
        self.validate_address(address)?;
        Address::from_str(address)
            .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))
    }

    /// Amounts are contract-native integers and must be strictly positive
    pub fn validate_amount(&self, amount: U256) -> WalletResult<()> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate an RPC endpoint or public base URL
    pub fn validate_endpoint(&self, endpoint: &str) -> WalletResult<()> {
        self.check_basic_security(endpoint)?;

        if !self.endpoint_pattern.is_match(endpoint) {
            return Err(WalletError::ConfigurationError(format!(
                "'{}' is not an http(s) URL",
                endpoint
            )));
        }

        reqwest::Url::parse(endpoint)
            .map_err(|e| WalletError::ConfigurationError(format!("{}: {}", endpoint, e)))?;
        Ok(())
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(WalletError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_checksummed_and_lowercase_addresses() {
        let validator = InputValidator::new().unwrap();
        let parsed = validator
            .parse_address("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
            .unwrap();
        let lower = validator
            .parse_address("0x70997970c51812dc3a010c7d01b50e0d17dc79c8")
            .unwrap();
        assert_eq!(parsed, lower);
    }

    #[test]
    fn rejects_malformed_addresses() {
        let validator = InputValidator::new().unwrap();
        for bad in ["", "0x1234", "70997970c51812dc3a010c7d01b50e0d17dc79c8", "0xZZ997970c51812dc3a010c7d01b50e0d17dc79c8"] {
            assert!(
                matches!(validator.validate_address(bad), Err(WalletError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
        assert!(matches!(
            validator.validate_address("javascript:alert(1)"),
            Err(WalletError::ValidationError(_))
        ));
    }

    #[test]
    fn shared_validator_is_reused() {
        let first = shared_validator().unwrap() as *const InputValidator;
        let second = shared_validator().unwrap() as *const InputValidator;
        assert_eq!(first, second);
    }

    #[test]
    fn zero_amount_is_invalid() {
        let validator = InputValidator::new().unwrap();
        assert!(matches!(
            validator.validate_amount(U256::zero()),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(validator.validate_amount(U256::one()).is_ok());
    }

    #[test]
    fn endpoints_must_be_http_urls() {
        let validator = InputValidator::new().unwrap();
        assert!(validator.validate_endpoint("http://localhost:8545").is_ok());
        assert!(validator.validate_endpoint("https://wallet.example.org").is_ok());
        assert!(matches!(
            validator.validate_endpoint("ftp://node"),
            Err(WalletError::ConfigurationError(_))
        ));
    }
}
