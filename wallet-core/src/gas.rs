use crate::blockchain::{GasQuote, QuoteSource};
use crate::blockchain_client::LedgerClient;
use crate::errors::WalletError;
use ethers_core::types::U256;
use parking_lot::Mutex;
use std::sync::Arc;

/// Gas price source that prefers a live quote and falls back to the last
/// good one. Starts from the configured default.
#[derive(Clone)]
pub struct GasPriceOracle {
    client: Arc<dyn LedgerClient>,
    cached: Arc<Mutex<U256>>,
}

impl GasPriceOracle {
    pub fn new(client: Arc<dyn LedgerClient>, default_price: U256) -> Self {
        Self {
            client,
            cached: Arc::new(Mutex::new(default_price)),
        }
    }

    /// Never fails: fetch errors and non-positive quotes leave the cache as is.
    pub async fn current_price(&self) -> GasQuote {
        match self.client.gas_price().await {
            Ok(price) if !price.is_zero() => {
                *self.cached.lock() = price;
                GasQuote {
                    price,
                    source: QuoteSource::Network,
                }
            }
            Ok(_) => {
                log::warn!("Network reported a zero gas price, keeping cached value");
                self.cached_quote()
            }
            Err(error) => {
                let error = WalletError::QuoteFetchError(error.to_string());
                log::error!("{}", error);
                self.cached_quote()
            }
        }
    }

    pub fn cached_price(&self) -> U256 {
        *self.cached.lock()
    }

    fn cached_quote(&self) -> GasQuote {
        GasQuote {
            price: self.cached_price(),
            source: QuoteSource::Cached,
        }
    }
}
