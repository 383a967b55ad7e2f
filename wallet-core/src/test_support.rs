use crate::config_store::WalletConfig;
use crate::contracts::{ContractRegistry, ContractRole};
use ethers_core::types::Address;

pub const TEST_NETWORK: u64 = 4447;

pub fn contract_address(role: ContractRole) -> Address {
    let offset = ContractRole::ALL
        .iter()
        .position(|candidate| *candidate == role)
        .unwrap_or_default() as u64;
    Address::from_low_u64_be(0x1000 + offset)
}

pub fn token_address() -> Address {
    contract_address(ContractRole::Token)
}

pub fn escrow_address() -> Address {
    contract_address(ContractRole::PaymentLinks)
}

pub fn test_config() -> WalletConfig {
    let mut config = WalletConfig::new("test");
    config.network.network_id = TEST_NETWORK;
    config.public_url = "https://wallet.example.org".to_string();
    for role in ContractRole::ALL {
        config.set_contract_address(role, TEST_NETWORK, contract_address(role));
    }
    config
}

pub fn test_registry(sender: Address) -> ContractRegistry {
    ContractRegistry::bind_all(&test_config().contracts, TEST_NETWORK, sender)
        .expect("test deployments cover every role")
}
