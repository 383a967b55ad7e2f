/// Ledger RPC client used by the wallet components
///
/// `LedgerClient` is the seam every component talks through. `RpcLedgerClient`
/// implements it over HTTP JSON-RPC against an EVM node, signing transactions
/// locally with the keys of the wallet's account set.
use crate::accounts::AccountSet;
use crate::blockchain::{BlockRange, CallRequest};
use crate::config_store::NetworkConfig;
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{
    Address, BlockNumber, Bytes, Filter, Log, Signature, TransactionReceipt, TransactionRequest,
    TxHash, U256, U64,
};
use ethers_signers::{LocalWallet, Signer};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn chain_id(&self) -> WalletResult<u64>;

    async fn block_number(&self) -> WalletResult<U64>;

    async fn gas_price(&self) -> WalletResult<U256>;

    /// Read-only contract call at the latest block.
    async fn call(&self, request: &CallRequest) -> WalletResult<Bytes>;

    async fn estimate_gas(&self, request: &CallRequest) -> WalletResult<U256>;

    /// Sign and broadcast; returns the transaction hash as soon as it is known.
    async fn submit(&self, request: &CallRequest) -> WalletResult<TxHash>;

    /// `None` while the transaction is still pending.
    async fn transaction_receipt(&self, hash: TxHash) -> WalletResult<Option<TransactionReceipt>>;

    async fn logs(&self, address: Address, range: BlockRange) -> WalletResult<Vec<Log>>;

    /// Personal-message signature by one of the wallet's accounts.
    async fn sign_message(&self, account: Address, payload: &[u8]) -> WalletResult<Signature>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    method: String,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Call object for `eth_call` and `eth_estimateGas`
#[derive(Debug, Serialize)]
struct RpcCall<'a> {
    from: Address,
    to: Address,
    data: &'a Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<U256>,
    #[serde(rename = "gasPrice", skip_serializing_if = "Option::is_none")]
    gas_price: Option<U256>,
}

impl<'a> From<&'a CallRequest> for RpcCall<'a> {
    fn from(request: &'a CallRequest) -> Self {
        Self {
            from: request.from,
            to: request.to,
            data: &request.data,
            gas: request.gas,
            gas_price: request.gas_price,
        }
    }
}

/// HTTP client for ledger RPC communication
pub struct RpcLedgerClient {
    client: Client,
    endpoints: Vec<String>,
    chain_id: u64,
    signers: HashMap<Address, LocalWallet>,
    request_id: AtomicU64,
}

impl RpcLedgerClient {
    /// Create a client for the configured endpoints, primary first.
    pub fn new(network: &NetworkConfig, accounts: &AccountSet) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(network.request_timeout_secs))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        let chain_id = network.network_id;
        let signers = accounts
            .signers()
            .iter()
            .map(|signer| {
                let signer = signer.clone().with_chain_id(chain_id);
                (signer.address(), signer)
            })
            .collect();

        Ok(RpcLedgerClient {
            client,
            endpoints: network
                .endpoints()
                .into_iter()
                .map(|endpoint| endpoint.trim_end_matches('/').to_string())
                .collect(),
            chain_id,
            signers,
            request_id: AtomicU64::new(1),
        })
    }

    fn signer(&self, account: Address) -> WalletResult<&LocalWallet> {
        self.signers.get(&account).ok_or_else(|| {
            WalletError::InvalidKey(format!("No signing key held for {:?}", account))
        })
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> WalletResult<T> {
        let mut last_error = WalletError::NetworkError("No RPC endpoints configured".to_string());

        for endpoint in &self.endpoints {
            match self.rpc_call_at(endpoint, method, &params).await {
                Ok(result) => return Ok(result),
                // node answered; another endpoint will not change the verdict
                Err(error @ WalletError::InvalidResponse(_)) => return Err(error),
                Err(error) => {
                    log::warn!("RPC {} via {} failed: {}", method, endpoint, error);
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    async fn rpc_call_at<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: &serde_json::Value,
    ) -> WalletResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self.client.post(endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| WalletError::NetworkError(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::InvalidResponse(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        // null is a legitimate answer, e.g. a receipt that is still pending
        let result = rpc_response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| {
            WalletError::InvalidResponse(format!("Unexpected {} result: {}", method, e))
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn chain_id(&self) -> WalletResult<u64> {
        let chain_id: U64 = self.rpc_call("eth_chainId", serde_json::json!([])).await?;
        Ok(chain_id.as_u64())
    }

    async fn block_number(&self) -> WalletResult<U64> {
        self.rpc_call("eth_blockNumber", serde_json::json!([])).await
    }

    async fn gas_price(&self) -> WalletResult<U256> {
        self.rpc_call("eth_gasPrice", serde_json::json!([])).await
    }

    async fn call(&self, request: &CallRequest) -> WalletResult<Bytes> {
        let params = serde_json::json!([RpcCall::from(request), "latest"]);
        self.rpc_call("eth_call", params).await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> WalletResult<U256> {
        let params = serde_json::json!([RpcCall::from(request)]);
        self.rpc_call("eth_estimateGas", params).await
    }

    async fn submit(&self, request: &CallRequest) -> WalletResult<TxHash> {
        let signer = self.signer(request.from)?;
        let nonce: U256 = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([request.from, "pending"]),
            )
            .await?;

        let mut tx = TransactionRequest::new()
            .from(request.from)
            .to(request.to)
            .data(request.data.clone())
            .nonce(nonce)
            .chain_id(self.chain_id);
        if let Some(gas) = request.gas {
            tx = tx.gas(gas);
        }
        if let Some(gas_price) = request.gas_price {
            tx = tx.gas_price(gas_price);
        }

        let tx: TypedTransaction = tx.into();
        let signature = signer
            .sign_transaction_sync(&tx)
            .map_err(|e| WalletError::SignatureError(format!("Failed to sign transaction: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        self.rpc_call("eth_sendRawTransaction", serde_json::json!([raw]))
            .await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> WalletResult<Option<TransactionReceipt>> {
        self.rpc_call("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    async fn logs(&self, address: Address, range: BlockRange) -> WalletResult<Vec<Log>> {
        let filter = Filter::new()
            .address(address)
            .from_block(BlockNumber::Number(range.from_block()))
            .to_block(BlockNumber::Number(range.to_block()));
        self.rpc_call("eth_getLogs", serde_json::json!([filter])).await
    }

    async fn sign_message(&self, account: Address, payload: &[u8]) -> WalletResult<Signature> {
        self.signer(account)?
            .sign_message(payload)
            .await
            .map_err(|e| WalletError::SignatureError(format!("Failed to sign message: {}", e)))
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::accounts::AccountSet;
    use secrecy::SecretString;

    fn local_network() -> NetworkConfig {
        NetworkConfig {
            network_id: 31337,
            primary_endpoint: "http://localhost:8545".to_string(),
            failover_endpoints: Vec::new(),
            request_timeout_secs: 5,
        }
    }

    fn test_accounts() -> AccountSet {
        AccountSet::from_mnemonic(&SecretString::from(
            "test test test test test test test test test test test junk".to_string(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn signs_messages_with_held_keys_only() {
        let accounts = test_accounts();
        let client = RpcLedgerClient::new(&local_network(), &accounts).unwrap();

        let account = accounts.default_account();
        let signature = client.sign_message(account, b"hello").await.unwrap();
        assert_eq!(signature.recover("hello").unwrap(), account);

        let stranger = Address::from_low_u64_be(42);
        assert!(matches!(
            client.sign_message(stranger, b"hello").await,
            Err(WalletError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoints_surface_network_errors() {
        let mut network = local_network();
        network.primary_endpoint = "http://127.0.0.1:9".to_string();
        network.failover_endpoints = vec!["http://127.0.0.1:9/".to_string()];
        let client = RpcLedgerClient::new(&network, &test_accounts()).unwrap();

        let result = client.block_number().await;
        assert!(matches!(
            result,
            Err(WalletError::NetworkError(_)) | Err(WalletError::ConnectionTimeout)
        ));
    }

    #[tokio::test]
    #[ignore = "requires running RPC server at localhost:8545"]
    async fn test_real_block_number_call() {
        let client = RpcLedgerClient::new(&local_network(), &test_accounts()).unwrap();
        let head = client.block_number().await.unwrap();
        let price = client.gas_price().await.unwrap();
        println!("head {} gas price {}", head, price);
    }
}
