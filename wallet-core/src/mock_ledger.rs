//! Scripted in-memory ledger.
//!
//! Understands the handful of token, claim and identity calls the wallet makes,
//! applies transfers to its own balance table and records every request so
//! tests can assert on what reached the chain.

use crate::blockchain::{BlockRange, CallRequest};
use crate::blockchain_client::LedgerClient;
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use ethers_core::abi::{decode, encode, short_signature, ParamType, Token};
use ethers_core::types::{
    Address, Bytes, Log, Signature, TransactionReceipt, TxHash, H256, U256, U64,
};
use ethers_core::utils::keccak256;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const DEFAULT_GAS_ESTIMATE: u64 = 60_000;

struct LedgerState {
    chain_id: u64,
    head: U64,
    latency: Duration,
    gas_price: Result<U256, String>,
    gas_estimate: U256,
    balances: HashMap<Address, U256>,
    entitlements: HashMap<Address, U256>,
    verified: HashSet<Address>,
    token: Option<Address>,
    logs: Vec<Log>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    hold_receipts: bool,
    nonce: u64,
    head_failures: usize,
    log_failures: usize,
    call_failure: Option<String>,
    estimate_failure: Option<String>,
    submit_failure: Option<String>,
    calls: Vec<CallRequest>,
    estimates: Vec<CallRequest>,
    submissions: Vec<CallRequest>,
    log_queries: Vec<(Address, BlockRange)>,
    signed: Vec<(Address, Vec<u8>)>,
}

pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                chain_id: 4447,
                head: U64::zero(),
                latency: Duration::ZERO,
                gas_price: Ok(U256::from(20_000_000_000u64)),
                gas_estimate: U256::from(DEFAULT_GAS_ESTIMATE),
                balances: HashMap::new(),
                entitlements: HashMap::new(),
                verified: HashSet::new(),
                token: None,
                logs: Vec::new(),
                receipts: HashMap::new(),
                hold_receipts: false,
                nonce: 0,
                head_failures: 0,
                log_failures: 0,
                call_failure: None,
                estimate_failure: None,
                submit_failure: None,
                calls: Vec::new(),
                estimates: Vec::new(),
                submissions: Vec::new(),
                log_queries: Vec::new(),
                signed: Vec::new(),
            }),
        }
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = U64::from(head);
    }

    pub fn head(&self) -> U64 {
        self.state.lock().head
    }

    /// Delay every request, so concurrent callers interleave.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn set_gas_price(&self, price: U256) {
        self.state.lock().gas_price = Ok(price);
    }

    pub fn fail_gas_price(&self, reason: &str) {
        self.state.lock().gas_price = Err(reason.to_string());
    }

    pub fn set_balance(&self, account: Address, balance: impl Into<U256>) {
        self.state.lock().balances.insert(account, balance.into());
    }

    pub fn balance(&self, account: Address) -> U256 {
        self.state
            .lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_entitlement(&self, account: Address, amount: impl Into<U256>) {
        self.state.lock().entitlements.insert(account, amount.into());
    }

    pub fn set_verified(&self, account: Address, verified: bool) {
        let mut state = self.state.lock();
        if verified {
            state.verified.insert(account);
        } else {
            state.verified.remove(&account);
        }
    }

    /// Token contract whose transfers emit `Transfer` logs.
    pub fn set_token_contract(&self, token: Address) {
        self.state.lock().token = Some(token);
    }

    pub fn push_transfer_log(
        &self,
        token: Address,
        from: Address,
        to: Address,
        value: impl Into<U256>,
        block: u64,
    ) {
        let log = transfer_log(token, from, to, value.into(), U64::from(block), None);
        self.state.lock().logs.push(log);
    }

    pub fn hold_receipts(&self, hold: bool) {
        self.state.lock().hold_receipts = hold;
    }

    pub fn fail_next_block_numbers(&self, count: usize) {
        self.state.lock().head_failures = count;
    }

    pub fn fail_next_log_queries(&self, count: usize) {
        self.state.lock().log_failures = count;
    }

    pub fn fail_calls(&self, reason: Option<&str>) {
        self.state.lock().call_failure = reason.map(str::to_string);
    }

    pub fn fail_estimates(&self, reason: Option<&str>) {
        self.state.lock().estimate_failure = reason.map(str::to_string);
    }

    pub fn fail_submissions(&self, reason: Option<&str>) {
        self.state.lock().submit_failure = reason.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.state.lock().calls.clone()
    }

    pub fn estimates(&self) -> Vec<CallRequest> {
        self.state.lock().estimates.clone()
    }

    pub fn submissions(&self) -> Vec<CallRequest> {
        self.state.lock().submissions.clone()
    }

    pub fn log_queries(&self) -> Vec<(Address, BlockRange)> {
        self.state.lock().log_queries.clone()
    }

    pub fn signed_messages(&self) -> Vec<(Address, Vec<u8>)> {
        self.state.lock().signed.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn selector(name: &str, params: &[ParamType]) -> [u8; 4] {
    let signature = short_signature(name, params);
    let mut out = [0u8; 4];
    out.copy_from_slice(&signature);
    out
}

fn arguments(request: &CallRequest, params: &[ParamType]) -> WalletResult<Vec<Token>> {
    let data = request.data.as_ref();
    Ok(decode(params, data.get(4..).unwrap_or_default())?)
}

fn reverted(reason: &str) -> WalletError {
    WalletError::InvalidResponse(format!("RPC error 3: execution reverted: {}", reason))
}

fn transfer_log(
    token: Address,
    from: Address,
    to: Address,
    value: U256,
    block: U64,
    tx_hash: Option<TxHash>,
) -> Log {
    Log {
        address: token,
        topics: vec![
            H256::from(keccak256("Transfer(address,address,uint256)")),
            H256::from(from),
            H256::from(to),
        ],
        data: encode(&[Token::Uint(value)]).into(),
        block_number: Some(block),
        transaction_hash: tx_hash,
        ..Default::default()
    }
}

impl LedgerState {
    fn move_tokens(&mut self, from: Address, to: Address, value: U256) -> WalletResult<()> {
        let balance = self.balances.get(&from).copied().unwrap_or_default();
        if value > balance {
            return Err(reverted("transfer amount exceeds balance"));
        }
        self.balances.insert(from, balance - value);
        *self.balances.entry(to).or_default() += value;
        Ok(())
    }

    /// Token movement of a transaction, if any.
    fn execute(&mut self, request: &CallRequest) -> WalletResult<Option<(Address, Address, U256)>> {
        let Some(selector_bytes) = request.selector() else {
            return Ok(None);
        };

        if selector_bytes == selector("transfer", &[ParamType::Address, ParamType::Uint(256)]) {
            let args = arguments(request, &[ParamType::Address, ParamType::Uint(256)])?;
            return self.token_movement(request.from, args);
        }
        if selector_bytes
            == selector(
                "transferAndCall",
                &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
            )
        {
            let args = arguments(
                request,
                &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
            )?;
            return self.token_movement(request.from, args);
        }
        if selector_bytes == selector("claimTokens", &[]) {
            let amount = self.entitlements.remove(&request.from).unwrap_or_default();
            *self.balances.entry(request.from).or_default() += amount;
            return Ok(Some((Address::zero(), request.from, amount)));
        }
        Ok(None)
    }

    fn token_movement(
        &mut self,
        from: Address,
        args: Vec<Token>,
    ) -> WalletResult<Option<(Address, Address, U256)>> {
        let mut args = args.into_iter();
        let to = args.next().and_then(Token::into_address);
        let value = args.next().and_then(Token::into_uint);
        match (to, value) {
            (Some(to), Some(value)) => {
                self.move_tokens(from, to, value)?;
                Ok(Some((from, to, value)))
            }
            _ => Err(reverted("malformed transfer")),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn chain_id(&self) -> WalletResult<u64> {
        Ok(self.state.lock().chain_id)
    }

    async fn block_number(&self) -> WalletResult<U64> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(WalletError::NetworkError("eth_blockNumber unavailable".to_string()));
        }
        Ok(state.head)
    }

    async fn gas_price(&self) -> WalletResult<U256> {
        self.simulate_latency().await;
        self.state
            .lock()
            .gas_price
            .clone()
            .map_err(WalletError::NetworkError)
    }

    async fn call(&self, request: &CallRequest) -> WalletResult<Bytes> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.calls.push(request.clone());
        if let Some(reason) = &state.call_failure {
            return Err(WalletError::NetworkError(reason.clone()));
        }

        let Some(selector_bytes) = request.selector() else {
            return Err(reverted("empty call data"));
        };

        let output = if selector_bytes == selector("balanceOf", &[ParamType::Address]) {
            let owner = arguments(request, &[ParamType::Address])?
                .into_iter()
                .next()
                .and_then(Token::into_address)
                .ok_or_else(|| reverted("malformed balanceOf"))?;
            let balance = state.balances.get(&owner).copied().unwrap_or_default();
            encode(&[Token::Uint(balance)])
        } else if selector_bytes == selector("checkEntitlement", &[]) {
            let amount = state
                .entitlements
                .get(&request.from)
                .copied()
                .unwrap_or_default();
            encode(&[Token::Uint(amount)])
        } else if selector_bytes == selector("isVerified", &[ParamType::Address]) {
            let account = arguments(request, &[ParamType::Address])?
                .into_iter()
                .next()
                .and_then(Token::into_address)
                .ok_or_else(|| reverted("malformed isVerified"))?;
            encode(&[Token::Bool(state.verified.contains(&account))])
        } else {
            return Err(reverted("unknown function"));
        };

        Ok(output.into())
    }

    async fn estimate_gas(&self, request: &CallRequest) -> WalletResult<U256> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.estimates.push(request.clone());
        match &state.estimate_failure {
            Some(reason) => Err(reverted(reason)),
            None => Ok(state.gas_estimate),
        }
    }

    async fn submit(&self, request: &CallRequest) -> WalletResult<TxHash> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.submissions.push(request.clone());
        if let Some(reason) = &state.submit_failure {
            return Err(WalletError::NetworkError(reason.clone()));
        }

        let movement = state.execute(request)?;

        state.nonce += 1;
        state.head += U64::one();
        let hash = H256::from(keccak256(state.nonce.to_be_bytes()));
        let block = state.head;

        if let (Some(token), Some((from, to, value))) = (state.token, movement) {
            state
                .logs
                .push(transfer_log(token, from, to, value, block, Some(hash)));
        }

        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(block),
            from: request.from,
            to: Some(request.to),
            gas_used: request.gas,
            status: Some(U64::one()),
            ..Default::default()
        };
        state.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> WalletResult<Option<TransactionReceipt>> {
        self.simulate_latency().await;
        let state = self.state.lock();
        if state.hold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn logs(&self, address: Address, range: BlockRange) -> WalletResult<Vec<Log>> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.log_queries.push((address, range));
        if state.log_failures > 0 {
            state.log_failures -= 1;
            return Err(WalletError::NetworkError("eth_getLogs unavailable".to_string()));
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| log.block_number.map_or(false, |block| range.contains(block)))
            .cloned()
            .collect())
    }

    async fn sign_message(&self, account: Address, payload: &[u8]) -> WalletResult<Signature> {
        self.state.lock().signed.push((account, payload.to_vec()));
        Ok(Signature {
            r: U256::from_big_endian(&keccak256(payload)),
            s: U256::from_big_endian(account.as_bytes()),
            v: 27,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transfers_move_balances_and_emit_logs() {
        let ledger = MockLedger::new();
        let token = Address::from_low_u64_be(0x100);
        let alice = Address::from_low_u64_be(1);
        let bob = Address::from_low_u64_be(2);
        ledger.set_token_contract(token);
        ledger.set_balance(alice, 100u64);

        let data = short_signature("transfer", &[ParamType::Address, ParamType::Uint(256)])
            .into_iter()
            .chain(encode(&[Token::Address(bob), Token::Uint(U256::from(30))]))
            .collect::<Vec<u8>>();
        let hash = ledger
            .submit(&CallRequest::new(alice, token, data))
            .await
            .unwrap();

        assert_eq!(ledger.balance(alice), U256::from(70));
        assert_eq!(ledger.balance(bob), U256::from(30));
        let receipt = ledger.transaction_receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, Some(U64::one()));

        let logs = ledger
            .logs(token, BlockRange::new(0u64, 1u64).unwrap())
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].transaction_hash, Some(hash));
    }
}
