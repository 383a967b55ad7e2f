use crate::contracts::{ContractBinding, ContractRegistry, ContractRole};
use crate::errors::{WalletError, WalletResult};
use crate::queries::BalanceQuery;
use crate::transactions::{SubmissionLocks, TransactionPipeline};
use crate::validation::shared_validator;
use ethers_core::abi::Token;
use ethers_core::types::{TransactionReceipt, U256};

/// Direct token transfers and daily claims from the default account.
#[derive(Clone)]
pub struct TokenTransfers {
    queries: BalanceQuery,
    token: ContractBinding,
    claim: ContractBinding,
    pipeline: TransactionPipeline,
    locks: SubmissionLocks,
}

impl TokenTransfers {
    pub fn new(
        queries: BalanceQuery,
        contracts: &ContractRegistry,
        pipeline: TransactionPipeline,
        locks: SubmissionLocks,
    ) -> Self {
        Self {
            queries,
            token: contracts.binding(ContractRole::Token).clone(),
            claim: contracts.binding(ContractRole::Claim).clone(),
            pipeline,
            locks,
        }
    }

    pub async fn send_amount(&self, to: &str, amount: U256) -> WalletResult<TransactionReceipt> {
        let validator = shared_validator()?;
        let recipient = validator.parse_address(to)?;
        validator.validate_amount(amount)?;

        let sender = self.queries.account();
        let _in_flight = self.locks.acquire(sender).await;

        let balance = self.queries.balance().await?;
        if amount >= balance {
            return Err(WalletError::InsufficientFunds(format!(
                "cannot send {} with a balance of {}",
                amount, balance
            )));
        }

        let request = self.token.call_request_from(
            sender,
            "transfer",
            &[Token::Address(recipient), Token::Uint(amount)],
        )?;
        let receipt = self.pipeline.execute("token transfer", request).await?;
        log::info!("Sent {} to {:?}", amount, recipient);
        Ok(receipt)
    }

    /// Claim today's entitlement into the default account.
    pub async fn claim(&self) -> WalletResult<TransactionReceipt> {
        let sender = self.queries.account();
        let _in_flight = self.locks.acquire(sender).await;

        let request = self.claim.call_request_from(sender, "claimTokens", &[])?;
        self.pipeline.execute("claim", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::TransactionConfig;
    use crate::gas::GasPriceOracle;
    use crate::mock_ledger::MockLedger;
    use crate::test_support::{test_registry, token_address};
    use ethers_core::types::Address;
    use std::sync::Arc;

    const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn sender() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn transfers(ledger: &Arc<MockLedger>) -> TokenTransfers {
        let registry = test_registry(sender());
        let queries = BalanceQuery::new(ledger.clone(), &registry, sender());
        let gas = GasPriceOracle::new(ledger.clone(), U256::from(1_000_000_000u64));
        let pipeline = TransactionPipeline::new(ledger.clone(), gas, &TransactionConfig::default());
        TokenTransfers::new(queries, &registry, pipeline, SubmissionLocks::new())
    }

    #[tokio::test]
    async fn sends_within_balance() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(sender(), 100u64);
        let recipient: Address = RECIPIENT.parse().unwrap();

        let receipt = transfers(&ledger)
            .send_amount(RECIPIENT, U256::from(30))
            .await
            .unwrap();

        let submissions = ledger.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].to, token_address());
        assert_eq!(receipt.from, sender());
        assert_eq!(ledger.balance(sender()), U256::from(70));
        assert_eq!(ledger.balance(recipient), U256::from(30));
    }

    #[tokio::test]
    async fn over_balance_is_rejected_without_estimating() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(sender(), 100u64);

        let err = transfers(&ledger)
            .send_amount(RECIPIENT, U256::from(150))
            .await
            .unwrap_err();

        assert!(matches!(err, WalletError::InsufficientFunds(_)));
        assert!(ledger.estimates().is_empty());
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn malformed_recipient_never_touches_the_ledger() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(sender(), 100u64);
        let transfers = transfers(&ledger);

        let err = transfers.send_amount("0x1234", U256::from(1)).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));

        let err = transfers.send_amount(RECIPIENT, U256::zero()).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        assert!(ledger.calls().is_empty());
        assert!(ledger.estimates().is_empty());
    }

    #[tokio::test]
    async fn claim_credits_entitlement() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(sender(), 5u64);
        ledger.set_entitlement(sender(), 42u64);

        transfers(&ledger).claim().await.unwrap();

        assert_eq!(ledger.balance(sender()), U256::from(47));
        assert_eq!(ledger.submissions().len(), 1);
    }
}
