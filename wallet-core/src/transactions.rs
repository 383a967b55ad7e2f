use crate::blockchain::CallRequest;
use crate::blockchain_client::LedgerClient;
use crate::config_store::TransactionConfig;
use crate::errors::{WalletError, WalletResult};
use crate::gas::GasPriceOracle;
use ethers_core::types::{Address, TransactionReceipt, TxHash, U64};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One in-flight transfer per account.
#[derive(Clone, Default)]
pub struct SubmissionLocks {
    locks: Arc<Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>>,
}

impl SubmissionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the account's previous operation to finish. Held until the
    /// returned guard is dropped.
    pub async fn acquire(&self, account: Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(account).or_default())
        };
        lock.lock_owned().await
    }
}

/// Estimate, price, submit and confirm one transaction.
#[derive(Clone)]
pub struct TransactionPipeline {
    client: Arc<dyn LedgerClient>,
    gas: GasPriceOracle,
    receipt_timeout: Duration,
    receipt_poll: Duration,
}

impl TransactionPipeline {
    pub fn new(client: Arc<dyn LedgerClient>, gas: GasPriceOracle, config: &TransactionConfig) -> Self {
        Self {
            client,
            gas,
            receipt_timeout: config.receipt_timeout(),
            receipt_poll: config.receipt_poll_interval(),
        }
    }

    pub async fn execute(&self, label: &str, request: CallRequest) -> WalletResult<TransactionReceipt> {
        let quote = self.gas.current_price().await;

        let gas = self.client.estimate_gas(&request).await.map_err(|e| {
            let error = WalletError::EstimationError(format!("{}: {}", label, e));
            log::error!("{}", error);
            error
        })?;
        log::debug!("{} estimated at {} gas, price {} ({:?})", label, gas, quote.price, quote.source);

        let request = request.gas(gas).gas_price(quote.price);
        let hash = self.client.submit(&request).await.map_err(|e| {
            let error = WalletError::SubmissionError(format!("{}: {}", label, e));
            log::error!("{}", error);
            error
        })?;
        log::info!("{} submitted, transaction hash {:?}", label, hash);

        let receipt = self.await_receipt(hash).await?;
        if receipt.status == Some(U64::zero()) {
            return Err(WalletError::SubmissionError(format!(
                "{} reverted in block {:?}, transaction hash {:?}",
                label, receipt.block_number, hash
            )));
        }
        Ok(receipt)
    }

    pub async fn await_receipt(&self, hash: TxHash) -> WalletResult<TransactionReceipt> {
        match tokio::time::timeout(self.receipt_timeout, self.poll_receipt(hash)).await {
            Ok(result) => result,
            Err(_) => {
                log::error!(
                    "No receipt for {:?} after {:?}",
                    hash,
                    self.receipt_timeout
                );
                Err(WalletError::ConnectionTimeout)
            }
        }
    }

    async fn poll_receipt(&self, hash: TxHash) -> WalletResult<TransactionReceipt> {
        loop {
            if let Some(receipt) = self.client.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_ledger::MockLedger;
    use ethers_core::types::U256;

    fn pipeline(ledger: &Arc<MockLedger>) -> TransactionPipeline {
        let gas = GasPriceOracle::new(ledger.clone(), U256::from(1_000_000_000u64));
        TransactionPipeline::new(ledger.clone(), gas, &TransactionConfig::default())
    }

    fn claim_request() -> CallRequest {
        CallRequest::new(
            Address::from_low_u64_be(1),
            Address::from_low_u64_be(2),
            ethers_core::abi::short_signature("claimTokens", &[]).to_vec(),
        )
    }

    #[tokio::test]
    async fn submits_with_estimate_and_quote() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_gas_price(U256::from(3_000_000_000u64));

        let receipt = pipeline(&ledger).execute("claim", claim_request()).await.unwrap();

        let submissions = ledger.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].gas_price, Some(U256::from(3_000_000_000u64)));
        assert_eq!(submissions[0].gas, Some(U256::from(60_000)));
        assert_eq!(receipt.status, Some(U64::one()));
    }

    #[tokio::test]
    async fn estimation_failure_aborts_before_submission() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_estimates(Some("out of gas"));

        let err = pipeline(&ledger)
            .execute("claim", claim_request())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::EstimationError(_)));
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_is_reported() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_submissions(Some("nonce too low"));

        let err = pipeline(&ledger)
            .execute("claim", claim_request())
            .await
            .unwrap_err();
        match err {
            WalletError::SubmissionError(msg) => assert!(msg.contains("nonce too low")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_receipt_times_out() {
        let ledger = Arc::new(MockLedger::new());
        ledger.hold_receipts(true);

        let err = pipeline(&ledger)
            .execute("claim", claim_request())
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::ConnectionTimeout);
    }

    #[tokio::test]
    async fn locks_are_per_account() {
        let locks = SubmissionLocks::new();
        let alice = Address::from_low_u64_be(1);
        let bob = Address::from_low_u64_be(2);

        let held = locks.acquire(alice).await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(bob)).await;
        assert!(other.is_ok());

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(alice)).await;
        assert!(blocked.is_err());

        drop(held);
        assert!(tokio::time::timeout(Duration::from_millis(50), locks.acquire(alice))
            .await
            .is_ok());
    }
}
