//! Wallet facade.
//!
//! A [`Wallet`] is built once per process from a validated configuration, a set
//! of accounts and a ledger client. Every contract binding is resolved during
//! [`Wallet::initialize`], so a wallet that exists is ready to use.

use crate::accounts::{AccountSet, AccountUsage};
use crate::blockchain::{BlockRange, GasQuote, LedgerEvent, PaymentLink};
use crate::blockchain_client::{LedgerClient, RpcLedgerClient};
use crate::config_store::{PollerConfig, WalletConfig};
use crate::contracts::ContractRegistry;
use crate::errors::WalletResult;
use crate::gas::GasPriceOracle;
use crate::payments::PaymentLinkGenerator;
use crate::poller::{self, EventFilter, EventPoller, PollBatch, Subscription};
use crate::queries::BalanceQuery;
use crate::transactions::{SubmissionLocks, TransactionPipeline};
use crate::transfers::TokenTransfers;
use ethers_core::types::{Address, Signature, TransactionReceipt, U256};
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub direction: BalanceDirection,
    pub batch: PollBatch,
}

/// Outgoing and incoming token transfers of the default account.
pub struct BalanceSubscriptions {
    pub sent: Subscription,
    pub received: Subscription,
}

impl BalanceSubscriptions {
    /// Next delivery from either side; `None` once both have ended.
    pub async fn next(&mut self) -> Option<BalanceChange> {
        tokio::select! {
            Some(batch) = self.sent.next() => Some(BalanceChange {
                direction: BalanceDirection::Sent,
                batch,
            }),
            Some(batch) = self.received.next() => Some(BalanceChange {
                direction: BalanceDirection::Received,
                batch,
            }),
            else => None,
        }
    }

    pub async fn cancel(self) {
        self.sent.cancel().await;
        self.received.cancel().await;
    }
}

pub struct Wallet {
    accounts: AccountSet,
    client: Arc<dyn LedgerClient>,
    contracts: ContractRegistry,
    gas: GasPriceOracle,
    queries: BalanceQuery,
    links: PaymentLinkGenerator,
    transfers: TokenTransfers,
    poller: PollerConfig,
}

impl Wallet {
    /// Validate `config`, bind every contract role and wire the components.
    pub async fn initialize(
        config: &WalletConfig,
        accounts: AccountSet,
        client: Arc<dyn LedgerClient>,
    ) -> WalletResult<Self> {
        config.validate()?;
        let network_id = config.network.network_id;
        let account = accounts.default_account();

        let contracts = ContractRegistry::bind_all(&config.contracts, network_id, account)?;

        match client.chain_id().await {
            Ok(chain_id) if chain_id != network_id => log::warn!(
                "Ledger reports chain id {} but network {} is configured",
                chain_id,
                network_id
            ),
            Ok(_) => {}
            Err(e) => log::warn!("Could not confirm chain id: {}", e),
        }

        let gas = GasPriceOracle::new(Arc::clone(&client), config.gas.default_price());
        let queries = BalanceQuery::new(Arc::clone(&client), &contracts, account);
        let pipeline = TransactionPipeline::new(Arc::clone(&client), gas.clone(), &config.transactions);
        let locks = SubmissionLocks::new();
        let links = PaymentLinkGenerator::new(
            queries.clone(),
            &contracts,
            pipeline.clone(),
            locks.clone(),
            config.public_url.clone(),
        );
        let transfers = TokenTransfers::new(queries.clone(), &contracts, pipeline, locks);

        log::info!(
            "Wallet ready on network {} ({}), default account {:?}",
            network_id,
            config.environment,
            account
        );

        Ok(Self {
            accounts,
            client,
            contracts,
            gas,
            queries,
            links,
            transfers,
            poller: config.poller.clone(),
        })
    }

    /// Derive accounts from `mnemonic` and talk to the configured RPC endpoints.
    pub async fn connect(config: &WalletConfig, mnemonic: &SecretString) -> WalletResult<Self> {
        let accounts = AccountSet::from_mnemonic(mnemonic)?;
        let client = RpcLedgerClient::new(&config.network, &accounts)?;
        Self::initialize(config, accounts, Arc::new(client)).await
    }

    pub fn account(&self) -> Address {
        self.accounts.default_account()
    }

    pub fn account_for(&self, usage: AccountUsage) -> Address {
        self.accounts.account_for(usage)
    }

    pub fn accounts(&self) -> &AccountSet {
        &self.accounts
    }

    pub fn network_id(&self) -> u64 {
        self.contracts.network_id()
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub async fn claim(&self) -> WalletResult<TransactionReceipt> {
        self.transfers.claim().await
    }

    pub async fn check_entitlement(&self) -> WalletResult<U256> {
        self.queries.check_entitlement().await
    }

    pub async fn balance_of(&self, account: Address) -> WalletResult<U256> {
        self.queries.balance_of(account).await
    }

    pub async fn balance(&self) -> WalletResult<U256> {
        self.queries.balance().await
    }

    pub async fn is_verified(&self, account: Address) -> WalletResult<bool> {
        self.queries.is_verified(account).await
    }

    pub async fn is_citizen(&self) -> WalletResult<bool> {
        self.queries.is_citizen().await
    }

    pub async fn can_send(&self, amount: U256) -> WalletResult<bool> {
        self.queries.can_send(amount).await
    }

    pub async fn can_claim(&self) -> WalletResult<bool> {
        self.queries.can_claim().await
    }

    pub async fn send_amount(&self, to: &str, amount: U256) -> WalletResult<TransactionReceipt> {
        self.transfers.send_amount(to, amount).await
    }

    pub async fn generate_link(&self, amount: U256) -> WalletResult<PaymentLink> {
        self.links.generate_link(amount).await
    }

    /// Personal-message signature by the account assigned to `usage`.
    pub async fn sign(&self, payload: &[u8], usage: AccountUsage) -> WalletResult<Signature> {
        let account = self.accounts.account_for(usage);
        self.client.sign_message(account, payload).await
    }

    pub async fn get_gas_price(&self) -> GasQuote {
        self.gas.current_price().await
    }

    /// Start watching the events selected by `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        EventPoller::new(
            Arc::clone(&self.client),
            &self.contracts,
            filter,
            self.poller.interval(),
        )
        .spawn(self.poller.channel_capacity)
    }

    pub fn balance_changed(&self) -> BalanceSubscriptions {
        let account = self.account();
        BalanceSubscriptions {
            sent: self.subscribe(EventFilter::transfers_from(account)),
            received: self.subscribe(EventFilter::transfers_to(account)),
        }
    }

    pub async fn fetch_events(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> WalletResult<Vec<LedgerEvent>> {
        let binding = self.contracts.binding(filter.role);
        poller::fetch_events(self.client.as_ref(), binding, filter, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractRole;
    use crate::errors::WalletError;
    use crate::mock_ledger::MockLedger;
    use crate::test_support::{test_config, TEST_NETWORK};

    fn accounts() -> AccountSet {
        let addresses: Vec<Address> = (1..=4).map(Address::from_low_u64_be).collect();
        AccountSet::from_addresses(addresses[0], addresses)
    }

    #[tokio::test]
    async fn missing_binding_fails_initialization() {
        let ledger = Arc::new(MockLedger::new());
        let mut config = test_config();
        config.contracts.remove(&ContractRole::Reserve);

        let err = Wallet::initialize(&config, accounts(), ledger.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::ConfigurationError(_)));

        let mut config = test_config();
        config.network.network_id = TEST_NETWORK + 1;
        let err = Wallet::initialize(&config, accounts(), ledger).await.err().unwrap();
        assert!(matches!(err, WalletError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = test_config();
        config.network.primary_endpoint = "not a url".to_string();

        let result = Wallet::initialize(&config, accounts(), Arc::new(MockLedger::new())).await;
        assert!(matches!(result, Err(WalletError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn signs_with_the_usage_account() {
        let ledger = Arc::new(MockLedger::new());
        let wallet = Wallet::initialize(&test_config(), accounts(), ledger.clone())
            .await
            .unwrap();

        wallet.sign(b"login", AccountUsage::PeerDirectory).await.unwrap();
        wallet.sign(b"attest", AccountUsage::ChainIdentity).await.unwrap();

        let signed = ledger.signed_messages();
        assert_eq!(signed[0], (Address::from_low_u64_be(2), b"login".to_vec()));
        assert_eq!(signed[1], (Address::from_low_u64_be(3), b"attest".to_vec()));
        assert_eq!(wallet.account_for(AccountUsage::Donation), Address::from_low_u64_be(4));
        assert_eq!(wallet.network_id(), TEST_NETWORK);
    }

    #[tokio::test]
    async fn gas_quote_falls_back_to_configured_default() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_gas_price("node syncing");
        let mut config = test_config();
        config.gas.default_price_wei = 7;

        let wallet = Wallet::initialize(&config, accounts(), ledger).await.unwrap();
        assert_eq!(wallet.get_gas_price().await.price, U256::from(7));
    }
}
