//! Payment links: tokens parked in the escrow contract under a one-time code
//! that the recipient redeems through a shareable URL.

use crate::blockchain::PaymentLink;
use crate::contracts::{ContractBinding, ContractRegistry, ContractRole};
use crate::errors::{WalletError, WalletResult};
use crate::queries::BalanceQuery;
use crate::transactions::{SubmissionLocks, TransactionPipeline};
use crate::validation::shared_validator;
use ethers_core::abi::Token;
use ethers_core::types::{H256, U256};
use rand::{rngs::OsRng, RngCore};
use sha3::{Digest, Keccak256};

const RECEIVE_LINK_PATH: &str = "AppNavigation/Dashboard/ReceiveLink";
const CODE_SEED_BYTES: usize = 10;

/// Shareable URL under which `code` is redeemed.
pub fn receive_link_url(public_url: &str, code: &H256) -> String {
    format!(
        "{}/{}/0x{}",
        public_url.trim_end_matches('/'),
        RECEIVE_LINK_PATH,
        hex::encode(code.as_bytes())
    )
}

/// Keccak-256 of fresh random bytes.
pub fn generate_redemption_code() -> WalletResult<H256> {
    let mut seed = [0u8; CODE_SEED_BYTES];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate link code: {}", e)))?;

    let mut hasher = Keccak256::new();
    hasher.update(seed);
    Ok(H256::from_slice(&hasher.finalize()))
}

#[derive(Clone)]
pub struct PaymentLinkGenerator {
    queries: BalanceQuery,
    token: ContractBinding,
    escrow: ContractBinding,
    pipeline: TransactionPipeline,
    locks: SubmissionLocks,
    public_url: String,
}

impl PaymentLinkGenerator {
    pub fn new(
        queries: BalanceQuery,
        contracts: &ContractRegistry,
        pipeline: TransactionPipeline,
        locks: SubmissionLocks,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            queries,
            token: contracts.binding(ContractRole::Token).clone(),
            escrow: contracts.binding(ContractRole::PaymentLinks).clone(),
            pipeline,
            locks,
            public_url: public_url.into(),
        }
    }

    /// Move `amount` into escrow and return the link that releases it.
    pub async fn generate_link(&self, amount: U256) -> WalletResult<PaymentLink> {
        shared_validator()?.validate_amount(amount)?;

        let sender = self.queries.account();
        let _in_flight = self.locks.acquire(sender).await;

        let balance = self.queries.balance().await?;
        if amount >= balance {
            return Err(WalletError::InsufficientFunds(format!(
                "cannot link {} with a balance of {}",
                amount, balance
            )));
        }

        let code = generate_redemption_code()?;
        let deposit = self.escrow.encode_call(
            "deposit",
            &[
                Token::Address(sender),
                Token::FixedBytes(code.as_bytes().to_vec()),
                Token::Uint(amount),
            ],
        )?;

        if log::log_enabled!(log::Level::Debug) {
            match self.queries.balance_of(self.escrow.address()).await {
                Ok(escrowed) => log::debug!("Escrow balance before deposit: {}", escrowed),
                Err(e) => log::debug!("Escrow balance unavailable: {}", e),
            }
        }

        let request = self.token.call_request_from(
            sender,
            "transferAndCall",
            &[
                Token::Address(self.escrow.address()),
                Token::Uint(amount),
                Token::Bytes(deposit.to_vec()),
            ],
        )?;
        let receipt = self.pipeline.execute("payment link deposit", request).await?;

        if log::log_enabled!(log::Level::Debug) {
            match self.queries.balance().await {
                Ok(remaining) => log::debug!("Sender balance after deposit: {}", remaining),
                Err(e) => log::debug!("Sender balance unavailable: {}", e),
            }
        }

        let url = receive_link_url(&self.public_url, &code);
        log::info!(
            "Payment link for {} created in transaction {:?}",
            amount,
            receipt.transaction_hash
        );

        Ok(PaymentLink {
            url,
            code,
            amount,
            sender,
            receipt,
        })
    }
}
