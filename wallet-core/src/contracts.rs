/// Contract bindings for the five ledger roles the wallet talks to.
///
/// Each role gets an ABI, the address deployed on the active network and the
/// default sender. Everything is resolved once, at wallet initialization; a role
/// without an address for the network is a configuration error.
use crate::blockchain::{CallRequest, LedgerEvent};
use crate::errors::{WalletError, WalletResult};
use ethers_core::abi::{parse_abi, Abi, Function, RawLog, Token};
use ethers_core::types::{Address, Bytes, Log};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    Identity,
    Token,
    Reserve,
    Claim,
    PaymentLinks,
}

impl ContractRole {
    pub const ALL: [ContractRole; 5] = [
        ContractRole::Identity,
        ContractRole::Token,
        ContractRole::Reserve,
        ContractRole::Claim,
        ContractRole::PaymentLinks,
    ];

    /// Human-readable ABI used when no artifact file is configured.
    fn builtin_abi(self) -> &'static [&'static str] {
        match self {
            ContractRole::Identity => &["function isVerified(address account) external view returns (bool)"],
            ContractRole::Token => &[
                "function balanceOf(address owner) external view returns (uint256)",
                "function transfer(address to, uint256 value) external returns (bool)",
                "function transferAndCall(address to, uint256 value, bytes data) external returns (bool)",
                "event Transfer(address indexed from, address indexed to, uint256 value)",
            ],
            // bound for completeness, never called
            ContractRole::Reserve => &[],
            ContractRole::Claim => &[
                "function claimTokens() external returns (bool)",
                "function checkEntitlement() external view returns (uint256)",
            ],
            ContractRole::PaymentLinks => &[
                "function deposit(address sender, bytes32 hash, uint256 amount) external",
            ],
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ContractRole::Identity => "identity",
            ContractRole::Token => "token",
            ContractRole::Reserve => "reserve",
            ContractRole::Claim => "claim",
            ContractRole::PaymentLinks => "payment_links",
        };
        f.write_str(name)
    }
}

/// Where one role is deployed, keyed by network id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDeployment {
    /// Optional compiled artifact (`{"abi": [...], "networks": {...}}`).
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub addresses: BTreeMap<u64, Address>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArtifactNetwork {
    address: Address,
}

/// Compiled contract artifact as emitted by common build pipelines.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub abi: Abi,
    #[serde(default)]
    networks: BTreeMap<String, ArtifactNetwork>,
}

impl ContractArtifact {
    pub fn load(path: &Path) -> WalletResult<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            WalletError::ConfigurationError(format!(
                "Invalid contract artifact {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn address_for(&self, network_id: u64) -> Option<Address> {
        self.networks
            .get(&network_id.to_string())
            .map(|network| network.address)
    }
}

#[derive(Debug, Clone)]
pub struct ContractBinding {
    role: ContractRole,
    abi: Abi,
    address: Address,
    sender: Address,
}

impl ContractBinding {
    pub fn new(role: ContractRole, abi: Abi, address: Address, sender: Address) -> Self {
        Self {
            role,
            abi,
            address,
            sender,
        }
    }

    pub fn role(&self) -> ContractRole {
        self.role
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn function(&self, name: &str) -> WalletResult<&Function> {
        self.abi.function(name).map_err(|e| {
            WalletError::ContractError(format!("{} contract has no '{}': {}", self.role, name, e))
        })
    }

    pub fn encode_call(&self, name: &str, args: &[Token]) -> WalletResult<Bytes> {
        let data = self.function(name)?.encode_input(args)?;
        Ok(data.into())
    }

    /// Call from the binding's default sender.
    pub fn call_request(&self, name: &str, args: &[Token]) -> WalletResult<CallRequest> {
        self.call_request_from(self.sender, name, args)
    }

    pub fn call_request_from(
        &self,
        from: Address,
        name: &str,
        args: &[Token],
    ) -> WalletResult<CallRequest> {
        Ok(CallRequest::new(from, self.address, self.encode_call(name, args)?))
    }

    pub fn decode_output(&self, name: &str, data: &[u8]) -> WalletResult<Vec<Token>> {
        Ok(self.function(name)?.decode_output(data)?)
    }

    /// Decode a log against every event in the ABI. Logs from other
    /// contracts or with unknown signatures yield `None`.
    pub fn decode_log(&self, log: &Log) -> Option<LedgerEvent> {
        if log.address != self.address {
            return None;
        }
        let topic0 = log.topics.first()?;
        let event = self
            .abi
            .events()
            .find(|event| !event.anonymous && event.signature() == *topic0)?;

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let parsed = match event.parse_log(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Undecodable {} log from {} contract: {}", event.name, self.role, e);
                return None;
            }
        };

        Some(LedgerEvent {
            event: event.name.clone(),
            address: log.address,
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            return_values: parsed
                .params
                .into_iter()
                .map(|param| (param.name, param.value))
                .collect(),
        })
    }
}

/// All role bindings for one network.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    network_id: u64,
    identity: ContractBinding,
    token: ContractBinding,
    reserve: ContractBinding,
    claim: ContractBinding,
    payment_links: ContractBinding,
}

impl ContractRegistry {
    pub fn bind_all(
        deployments: &BTreeMap<ContractRole, ContractDeployment>,
        network_id: u64,
        sender: Address,
    ) -> WalletResult<Self> {
        let bind = |role: ContractRole| bind_role(role, deployments.get(&role), network_id, sender);

        let registry = Self {
            network_id,
            identity: bind(ContractRole::Identity)?,
            token: bind(ContractRole::Token)?,
            reserve: bind(ContractRole::Reserve)?,
            claim: bind(ContractRole::Claim)?,
            payment_links: bind(ContractRole::PaymentLinks)?,
        };

        log::info!(
            "Bound {} contracts on network {}",
            ContractRole::ALL.len(),
            network_id
        );
        Ok(registry)
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn binding(&self, role: ContractRole) -> &ContractBinding {
        match role {
            ContractRole::Identity => &self.identity,
            ContractRole::Token => &self.token,
            ContractRole::Reserve => &self.reserve,
            ContractRole::Claim => &self.claim,
            ContractRole::PaymentLinks => &self.payment_links,
        }
    }
}

fn bind_role(
    role: ContractRole,
    deployment: Option<&ContractDeployment>,
    network_id: u64,
    sender: Address,
) -> WalletResult<ContractBinding> {
    let artifact = match deployment.and_then(|d| d.artifact.as_deref()) {
        Some(path) => Some(ContractArtifact::load(path)?),
        None => None,
    };

    let address = deployment
        .and_then(|d| d.addresses.get(&network_id).copied())
        .or_else(|| artifact.as_ref().and_then(|a| a.address_for(network_id)))
        .ok_or_else(|| {
            WalletError::ConfigurationError(format!(
                "{} contract has no address for network {}",
                role, network_id
            ))
        })?;

    let abi = match artifact {
        Some(artifact) => artifact.abi,
        None => parse_abi(role.builtin_abi()).map_err(|e| {
            WalletError::ConfigurationError(format!("Built-in {} ABI is invalid: {}", role, e))
        })?,
    };

    log::debug!("Bound {} contract at {:?}", role, address);
    Ok(ContractBinding::new(role, abi, address, sender))
}
