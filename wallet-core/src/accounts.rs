//! Per-purpose accounts derived from a single mnemonic.
//!
//! Every usage category owns a fixed BIP-44 index under `m/44'/60'/0'/0/`. A
//! category whose slot was not derived resolves to the default account.

use crate::errors::{WalletError, WalletResult};
use ethers_core::types::Address;
use ethers_signers::coins_bip39::English;
use ethers_signers::{LocalWallet, MnemonicBuilder, Signer};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of accounts derived from a mnemonic, one per usage category.
pub const ACCOUNT_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountUsage {
    /// Everyday token spending and receiving.
    GeneralSpend,
    /// Identity inside the peer-to-peer profile directory.
    PeerDirectory,
    /// On-chain identity attestations.
    ChainIdentity,
    Donation,
}

impl AccountUsage {
    pub const ALL: [AccountUsage; 4] = [
        AccountUsage::GeneralSpend,
        AccountUsage::PeerDirectory,
        AccountUsage::ChainIdentity,
        AccountUsage::Donation,
    ];

    pub fn index(self) -> usize {
        match self {
            AccountUsage::GeneralSpend => 0,
            AccountUsage::PeerDirectory => 1,
            AccountUsage::ChainIdentity => 2,
            AccountUsage::Donation => 3,
        }
    }
}

impl Default for AccountUsage {
    fn default() -> Self {
        AccountUsage::GeneralSpend
    }
}

/// Accounts available to one wallet.
#[derive(Clone)]
pub struct AccountSet {
    default: Address,
    addresses: Vec<Address>,
    signers: Vec<LocalWallet>,
}

impl AccountSet {
    /// Derive `ACCOUNT_COUNT` signing accounts from a BIP-39 phrase.
    pub fn from_mnemonic(mnemonic: &SecretString) -> WalletResult<Self> {
        let phrase = mnemonic.expose_secret();
        validate_mnemonic(phrase)?;

        let mut signers = Vec::with_capacity(ACCOUNT_COUNT as usize);
        for index in 0..ACCOUNT_COUNT {
            let signer = MnemonicBuilder::<English>::default()
                .phrase(phrase)
                .index(index)
                .and_then(|builder| builder.build())
                .map_err(|e| {
                    WalletError::InvalidKey(format!("Failed to derive account {}: {}", index, e))
                })?;
            signers.push(signer);
        }

        let addresses: Vec<Address> = signers.iter().map(|signer| signer.address()).collect();
        let default = addresses
            .first()
            .copied()
            .ok_or_else(|| WalletError::InvalidKey("No accounts derived".to_string()))?;
        log::debug!("Derived {} accounts, default {:?}", addresses.len(), default);

        Ok(Self {
            default,
            addresses,
            signers,
        })
    }

    /// Watch-only set; the ledger client must hold the keys.
    pub fn from_addresses(default: Address, addresses: Vec<Address>) -> Self {
        Self {
            default,
            addresses,
            signers: Vec::new(),
        }
    }

    pub fn default_account(&self) -> Address {
        self.default
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn account_for(&self, usage: AccountUsage) -> Address {
        self.addresses
            .get(usage.index())
            .copied()
            .unwrap_or(self.default)
    }

    pub fn signers(&self) -> &[LocalWallet] {
        &self.signers
    }

    pub fn is_watch_only(&self) -> bool {
        self.signers.is_empty()
    }
}

impl fmt::Debug for AccountSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSet")
            .field("default", &self.default)
            .field("addresses", &self.addresses)
            .field("signers", &"<redacted>")
            .finish()
    }
}

/// Generate a BIP39 mnemonic with specified word count
pub fn generate_mnemonic(word_count: u32) -> WalletResult<SecretString> {
    use bip39::Mnemonic;
    use rand::{rngs::OsRng, RngCore};
    use zeroize::Zeroize;

    let entropy_bits = match word_count {
        12 => 128,
        15 => 160,
        18 => 192,
        21 => 224,
        24 => 256,
        _ => {
            return Err(WalletError::ValidationError(format!(
                "Invalid word count {}",
                word_count
            )))
        }
    };

    let mut entropy = vec![0u8; entropy_bits / 8];
    let mut rng = OsRng;
    rng.try_fill_bytes(&mut entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)));
    entropy.zeroize();

    Ok(SecretString::from(mnemonic?.to_string()))
}

/// Validate a BIP39 mnemonic phrase
pub fn validate_mnemonic(mnemonic: &str) -> WalletResult<()> {
    use bip39::{Language, Mnemonic};

    Mnemonic::parse_in_normalized(Language::English, mnemonic)
        .map_err(|e| WalletError::ValidationError(format!("Invalid mnemonic: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PHRASE: &str = "test test test test test test test test test test test junk";

    fn addr(value: &str) -> Address {
        value.parse().unwrap()
    }

    #[test]
    fn derives_fixed_index_per_usage() {
        let accounts = AccountSet::from_mnemonic(&SecretString::from(TEST_PHRASE.to_string()))
            .unwrap();

        assert_eq!(
            accounts.account_for(AccountUsage::GeneralSpend),
            addr("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert_eq!(
            accounts.account_for(AccountUsage::PeerDirectory),
            addr("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
        assert_eq!(
            accounts.account_for(AccountUsage::ChainIdentity),
            addr("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC")
        );
        assert_eq!(
            accounts.account_for(AccountUsage::Donation),
            addr("0x90F79bf6EB2c4f870365E785982E1f101E93b906")
        );
        assert_eq!(accounts.default_account(), accounts.account_for(AccountUsage::GeneralSpend));
        assert_eq!(accounts.signers().len(), ACCOUNT_COUNT as usize);
    }

    #[test]
    fn same_key_set_yields_same_accounts() {
        let phrase = SecretString::from(TEST_PHRASE.to_string());
        let first = AccountSet::from_mnemonic(&phrase).unwrap();
        let second = AccountSet::from_mnemonic(&phrase).unwrap();
        for usage in AccountUsage::ALL {
            assert_eq!(first.account_for(usage), second.account_for(usage));
        }
    }

    #[test]
    fn missing_slot_falls_back_to_default() {
        let default = addr("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        let peer = addr("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let accounts = AccountSet::from_addresses(default, vec![default, peer]);

        assert_eq!(accounts.account_for(AccountUsage::PeerDirectory), peer);
        assert_eq!(accounts.account_for(AccountUsage::Donation), default);
        assert!(accounts.is_watch_only());
    }

    #[test]
    fn generated_mnemonic_validates_and_derives() {
        let phrase = generate_mnemonic(12).unwrap();
        assert_eq!(phrase.expose_secret().split_whitespace().count(), 12);
        validate_mnemonic(phrase.expose_secret()).unwrap();
        assert!(AccountSet::from_mnemonic(&phrase).is_ok());
        assert!(generate_mnemonic(13).is_err());
    }

    #[test]
    fn debug_output_hides_keys() {
        let accounts = AccountSet::from_mnemonic(&SecretString::from(TEST_PHRASE.to_string()))
            .unwrap();
        let rendered = format!("{:?}", accounts);
        assert!(rendered.contains("<redacted>"));
    }
}
