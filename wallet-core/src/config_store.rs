use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::contracts::{ContractDeployment, ContractRole};
use crate::errors::{WalletError, WalletResult};
use crate::validation::shared_validator;

const CONFIG_VERSION: u16 = 1;

const ENV_PREFIX: &str = "PAYLINK_";
const KEY_ENVIRONMENT: &str = "ENVIRONMENT";
const KEY_NETWORK_ID: &str = "NETWORK_ID";
const KEY_RPC_URL: &str = "RPC_URL";
const KEY_RPC_FAILOVER_URLS: &str = "RPC_FAILOVER_URLS";
const KEY_PUBLIC_URL: &str = "PUBLIC_URL";
const KEY_BLOCK_TIME_MS: &str = "POLL_BLOCK_TIME_MS";
const KEY_BLOCK_COUNT: &str = "POLL_BLOCK_COUNT";
const KEY_RECEIPT_TIMEOUT: &str = "RECEIPT_TIMEOUT_SECS";
const KEY_DEFAULT_GAS_PRICE: &str = "DEFAULT_GAS_PRICE_WEI";

/// 1 gwei.
pub const DEFAULT_GAS_PRICE_WEI: u64 = 1_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network_id: u64,
    pub primary_endpoint: String,
    pub failover_endpoints: Vec<String>,
    pub request_timeout_secs: u64,
}

impl NetworkConfig {
    /// Primary endpoint first, then failovers in configured order.
    pub fn endpoints(&self) -> Vec<&str> {
        std::iter::once(self.primary_endpoint.as_str())
            .chain(self.failover_endpoints.iter().map(String::as_str))
            .filter(|endpoint| !endpoint.trim().is_empty())
            .collect()
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_id: 4447,
            primary_endpoint: "http://localhost:8545".to_string(),
            failover_endpoints: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GasConfig {
    pub default_price_wei: u64,
}

impl GasConfig {
    pub fn default_price(&self) -> U256 {
        U256::from(self.default_price_wei)
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_price_wei: DEFAULT_GAS_PRICE_WEI,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollerConfig {
    pub block_time_ms: u64,
    pub block_count: u64,
    pub channel_capacity: usize,
}

impl PollerConfig {
    /// Pause between two poll cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.block_time_ms.saturating_mul(self.block_count))
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            block_time_ms: 2_500,
            block_count: 1,
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionConfig {
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
}

impl TransactionConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: 120,
            receipt_poll_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletConfig {
    pub network: NetworkConfig,
    pub contracts: BTreeMap<ContractRole, ContractDeployment>,
    pub gas: GasConfig,
    pub poller: PollerConfig,
    pub transactions: TransactionConfig,
    /// Base of the shareable payment link URLs.
    pub public_url: String,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig::default(),
            contracts: ContractRole::ALL
                .iter()
                .map(|role| (*role, ContractDeployment::default()))
                .collect(),
            gas: GasConfig::default(),
            poller: PollerConfig::default(),
            transactions: TransactionConfig::default(),
            public_url: "http://localhost:3000".to_string(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Record where `role` lives on `network_id`.
    pub fn set_contract_address(&mut self, role: ContractRole, network_id: u64, address: Address) {
        self.contracts
            .entry(role)
            .or_default()
            .addresses
            .insert(network_id, address);
    }

    /// Reject configurations the wallet cannot start with.
    pub fn validate(&self) -> WalletResult<()> {
        let validator = shared_validator()?;

        let endpoints = self.network.endpoints();
        if endpoints.is_empty() {
            return Err(WalletError::ConfigurationError(
                "At least one RPC endpoint is required".to_string(),
            ));
        }
        for endpoint in endpoints {
            validator.validate_endpoint(endpoint)?;
        }
        validator.validate_endpoint(&self.public_url)?;

        if self.network.request_timeout_secs == 0 {
            return Err(WalletError::ConfigurationError(
                "RPC request timeout must be positive".to_string(),
            ));
        }
        if self.poller.interval().is_zero() {
            return Err(WalletError::ConfigurationError(
                "Poll interval must be positive".to_string(),
            ));
        }
        if self.poller.channel_capacity == 0 {
            return Err(WalletError::ConfigurationError(
                "Poll channel capacity must be positive".to_string(),
            ));
        }
        if self.transactions.receipt_timeout_secs == 0 || self.transactions.receipt_poll_ms == 0 {
            return Err(WalletError::ConfigurationError(
                "Receipt timeout and poll interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply `PAYLINK_*` environment variables on top of the stored values.
    pub fn apply_env_overrides(&mut self) -> WalletResult<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> WalletResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> WalletResult<Option<String>> {
            match lookup(key) {
                Some(value) => {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        return Ok(None);
                    }
                    if trimmed.chars().any(|c| c.is_control()) {
                        return Err(WalletError::ConfigurationError(format!(
                            "Environment variable {}{} contains control characters",
                            ENV_PREFIX, key
                        )));
                    }
                    Ok(Some(trimmed.to_string()))
                }
                None => Ok(None),
            }
        };

        if let Some(value) = read(KEY_ENVIRONMENT)? {
            self.environment = value.to_lowercase();
        }
        if let Some(value) = read(KEY_NETWORK_ID)? {
            self.network.network_id = parse_u64_value(&value, KEY_NETWORK_ID)?;
        }
        if let Some(value) = read(KEY_RPC_URL)? {
            self.network.primary_endpoint = value;
        }
        if let Some(value) = read(KEY_RPC_FAILOVER_URLS)? {
            self.network.failover_endpoints = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read(KEY_PUBLIC_URL)? {
            self.public_url = value;
        }
        if let Some(value) = read(KEY_BLOCK_TIME_MS)? {
            self.poller.block_time_ms = parse_u64_value(&value, KEY_BLOCK_TIME_MS)?;
        }
        if let Some(value) = read(KEY_BLOCK_COUNT)? {
            self.poller.block_count = parse_u64_value(&value, KEY_BLOCK_COUNT)?;
        }
        if let Some(value) = read(KEY_RECEIPT_TIMEOUT)? {
            self.transactions.receipt_timeout_secs = parse_u64_value(&value, KEY_RECEIPT_TIMEOUT)?;
        }
        if let Some(value) = read(KEY_DEFAULT_GAS_PRICE)? {
            self.gas.default_price_wei = parse_u64_value(&value, KEY_DEFAULT_GAS_PRICE)?;
        }

        Ok(())
    }
}

fn parse_u64_value(value: &str, key: &str) -> WalletResult<u64> {
    value.parse::<u64>().map_err(|_| {
        WalletError::ConfigurationError(format!(
            "Environment variable {}{} must be an unsigned integer, got '{}'",
            ENV_PREFIX, key, value
        ))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            log::info!("Wrote default wallet config to {}", self.path.display());
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        let checksum = checksum(&envelope.payload)?;
        if checksum != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)?;
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);

        let mut config = WalletConfig::new("development");
        config.network.primary_endpoint = "http://localhost:7545".into();
        config.set_contract_address(ContractRole::Token, 4447, Address::from_low_u64_be(9));
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.network.primary_endpoint, "http://localhost:7545");
        assert_eq!(
            loaded.contracts[&ContractRole::Token].addresses[&4447],
            Address::from_low_u64_be(9)
        );
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let tampered = contents.replace("http://localhost:3000", "http://evil.example:3000");
        assert_ne!(contents, tampered);
        fs::write(&path, tampered).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("nested").join("wallet.config"));

        store
            .update("test", |config| {
                config.public_url = "https://wallet.example.org".to_string();
                Ok(())
            })
            .unwrap();

        let loaded = store.load_or_default("test").unwrap();
        assert_eq!(loaded.public_url, "https://wallet.example.org");
    }

    #[test]
    fn defaults_match_block_timing() {
        let config = WalletConfig::new("test");
        assert_eq!(config.poller.interval(), Duration::from_millis(2_500));
        assert_eq!(config.gas.default_price(), U256::from(1_000_000_000u64));
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let mut config = WalletConfig::new("test");
        config.network.primary_endpoint.clear();
        assert!(matches!(config.validate(), Err(WalletError::ConfigurationError(_))));

        let mut config = WalletConfig::new("test");
        config.poller.block_count = 0;
        assert!(matches!(config.validate(), Err(WalletError::ConfigurationError(_))));

        let mut config = WalletConfig::new("test");
        config.public_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(WalletError::ConfigurationError(_))));
    }

    #[test]
    fn overrides_replace_stored_values() {
        let vars: HashMap<&str, &str> = [
            (KEY_NETWORK_ID, "122"),
            (KEY_RPC_URL, "https://rpc.example.org"),
            (KEY_RPC_FAILOVER_URLS, "https://a.example.org, ,https://b.example.org"),
            (KEY_PUBLIC_URL, "  "),
            (KEY_BLOCK_TIME_MS, "5000"),
        ]
        .into_iter()
        .collect();

        let mut config = WalletConfig::new("test");
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.network.network_id, 122);
        assert_eq!(config.network.primary_endpoint, "https://rpc.example.org");
        assert_eq!(
            config.network.failover_endpoints,
            vec!["https://a.example.org", "https://b.example.org"]
        );
        assert_eq!(config.public_url, "http://localhost:3000");
        assert_eq!(config.poller.interval(), Duration::from_millis(5_000));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let mut config = WalletConfig::new("test");
        let result = config.apply_overrides(|key| {
            (key == KEY_BLOCK_COUNT).then(|| "two".to_string())
        });
        assert!(matches!(result, Err(WalletError::ConfigurationError(_))));
    }
}
