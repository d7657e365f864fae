// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use lucrum::application::{DepositInput, LedgerService};
use lucrum::config::LedgerConfig;
use lucrum::domain::{Account, Amount, Product};
use rust_decimal_macros::dec;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(LedgerConfig::default()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc> at noon
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
}

/// Create an account named `username` with a derived email address
pub async fn create_user(service: &LedgerService, username: &str) -> Result<Account> {
    Ok(service
        .create_account(username.into(), format!("{username}@example.com"), None)
        .await?)
}

/// Create an account that signed up with `referrer`'s code
pub async fn create_referred_user(
    service: &LedgerService,
    username: &str,
    referrer: &Account,
) -> Result<Account> {
    Ok(service
        .create_account(
            username.into(),
            format!("{username}@example.com"),
            Some(referrer.referral_code.clone()),
        )
        .await?)
}

/// Plain deposit without the lucky order commission
pub async fn fund(service: &LedgerService, username: &str, amount: Amount) -> Result<()> {
    service
        .deposit(
            username,
            DepositInput {
                amount,
                is_lucky_order_commission: false,
            },
        )
        .await?;
    Ok(())
}

/// Test fixture: a small catalogue, in rating order
pub struct Catalogue {
    pub headphones: Product,
    pub keyboard: Product,
    pub monitor: Product,
}

impl Catalogue {
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let headphones = service
            .add_product("Headphones".into(), dec!(20), "audio".into())
            .await?;
        let keyboard = service
            .add_product("Keyboard".into(), dec!(35), "peripherals".into())
            .await?;
        let monitor = service
            .add_product("Monitor".into(), dec!(120), "displays".into())
            .await?;
        Ok(Self {
            headphones,
            keyboard,
            monitor,
        })
    }
}
