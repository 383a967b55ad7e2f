use crate::blockchain_client::LedgerClient;
use crate::contracts::{ContractBinding, ContractRegistry, ContractRole};
use crate::errors::{WalletError, WalletResult};
use ethers_core::abi::Token;
use ethers_core::types::{Address, U256};
use std::sync::Arc;

/// Read-only token, claim and identity lookups for the default account.
#[derive(Clone)]
pub struct BalanceQuery {
    client: Arc<dyn LedgerClient>,
    token: ContractBinding,
    claim: ContractBinding,
    identity: ContractBinding,
    account: Address,
}

impl BalanceQuery {
    pub fn new(client: Arc<dyn LedgerClient>, contracts: &ContractRegistry, account: Address) -> Self {
        Self {
            client,
            token: contracts.binding(ContractRole::Token).clone(),
            claim: contracts.binding(ContractRole::Claim).clone(),
            identity: contracts.binding(ContractRole::Identity).clone(),
            account,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub async fn balance_of(&self, account: Address) -> WalletResult<U256> {
        let output = self
            .read(&self.token, "balanceOf", &[Token::Address(account)])
            .await?;
        first_uint(output, "balanceOf")
    }

    pub async fn balance(&self) -> WalletResult<U256> {
        self.balance_of(self.account).await
    }

    /// Today's claimable amount for the default account.
    pub async fn check_entitlement(&self) -> WalletResult<U256> {
        let output = self.read(&self.claim, "checkEntitlement", &[]).await?;
        first_uint(output, "checkEntitlement")
    }

    pub async fn is_verified(&self, address: Address) -> WalletResult<bool> {
        let output = self
            .read(&self.identity, "isVerified", &[Token::Address(address)])
            .await?;
        output
            .into_iter()
            .next()
            .and_then(Token::into_bool)
            .ok_or_else(|| WalletError::ContractError("isVerified returned no bool".to_string()))
    }

    pub async fn is_citizen(&self) -> WalletResult<bool> {
        self.is_verified(self.account).await
    }

    /// Strictly below the balance: sending the whole balance is refused.
    pub async fn can_send(&self, amount: U256) -> WalletResult<bool> {
        Ok(amount < self.balance().await?)
    }

    pub async fn can_claim(&self) -> WalletResult<bool> {
        Ok(!self.check_entitlement().await?.is_zero())
    }

    async fn read(
        &self,
        binding: &ContractBinding,
        function: &str,
        args: &[Token],
    ) -> WalletResult<Vec<Token>> {
        let request = binding.call_request_from(self.account, function, args)?;
        let output = self.client.call(&request).await.map_err(|e| {
            log::error!("{} call on {} contract failed: {}", function, binding.role(), e);
            e
        })?;
        binding.decode_output(function, &output)
    }
}

fn first_uint(output: Vec<Token>, function: &str) -> WalletResult<U256> {
    output
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| WalletError::ContractError(format!("{} returned no integer", function)))
}
