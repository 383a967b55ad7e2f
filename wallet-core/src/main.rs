use anyhow::Context;
use paylink_wallet::{BalanceDirection, ConfigStore, Wallet};
use secrecy::SecretString;

const DEFAULT_CONFIG_PATH: &str = "paylink-wallet.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::var("PAYLINK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let environment =
        std::env::var("PAYLINK_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let store = ConfigStore::new(&path);
    let mut config = store
        .load_or_default(environment)
        .with_context(|| format!("loading configuration from {}", path))?;
    config.apply_env_overrides()?;

    let mnemonic = SecretString::from(
        std::env::var("PAYLINK_MNEMONIC").context("PAYLINK_MNEMONIC must hold the wallet phrase")?,
    );
    let wallet = Wallet::connect(&config, &mnemonic).await?;

    log::info!("Account {:?}", wallet.account());
    log::info!("Balance {}", wallet.balance().await?);
    match wallet.check_entitlement().await {
        Ok(amount) => log::info!("Claimable today: {}", amount),
        Err(e) => log::warn!("Entitlement unavailable: {}", e),
    }

    let mut changes = wallet.balance_changed();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
            change = changes.next() => {
                let Some(change) = change else { break };
                if let Some(error) = change.batch.error {
                    log::warn!("Balance watch: {}", error);
                    continue;
                }
                for event in &change.batch.events {
                    let (direction, counterparty) = match change.direction {
                        BalanceDirection::Sent => ("sent to", event.address_field("to")),
                        BalanceDirection::Received => ("received from", event.address_field("from")),
                    };
                    log::info!(
                        "{} {} {:?} in block {:?}",
                        event.uint_field("value").unwrap_or_default(),
                        direction,
                        counterparty.unwrap_or_default(),
                        event.block_number
                    );
                }
                match wallet.balance().await {
                    Ok(balance) => log::info!("Balance {}", balance),
                    Err(e) => log::warn!("Balance unavailable: {}", e),
                }
            }
        }
    }

    changes.cancel().await;
    Ok(())
}
