use clap::Args;
use rust_decimal::Decimal;

use crate::domain::{Amount, DEFAULT_VOUCHER_VALIDITY_DAYS, LUCKY_ORDER_COMMISSION_RATE};

/// Rates and limits applied by the ledger service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Fraction of a lucky deposit credited as commission
    pub lucky_commission_rate: Decimal,
    /// Fraction of the product price credited back when a product is rated
    pub profit_rate: Decimal,
    pub min_withdrawal: Amount,
    /// Recorded on each withdrawal for the payout
    pub withdrawal_fee: Amount,
    /// Frontend base URL used to build referral links
    pub referral_link_base: String,
    /// Days a generated voucher stays redeemable
    pub voucher_validity_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lucky_commission_rate: LUCKY_ORDER_COMMISSION_RATE,
            profit_rate: Decimal::new(105, 2),
            min_withdrawal: Decimal::new(10, 0),
            withdrawal_fee: Decimal::new(2, 0),
            referral_link_base: "http://localhost:5173".to_string(),
            voucher_validity_days: DEFAULT_VOUCHER_VALIDITY_DAYS,
        }
    }
}

/// Command-line and environment overrides for [`LedgerConfig`].
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Lucky order commission rate (default 0.0005)
    #[arg(long, env = "LUCRUM_LUCKY_COMMISSION_RATE", global = true)]
    pub lucky_commission_rate: Option<Decimal>,

    /// Rating profit rate applied to the product price (default 1.05)
    #[arg(long, env = "LUCRUM_PROFIT_RATE", global = true)]
    pub profit_rate: Option<Decimal>,

    /// Minimum withdrawal amount (default 10)
    #[arg(long, env = "LUCRUM_MIN_WITHDRAWAL", global = true)]
    pub min_withdrawal: Option<Decimal>,

    /// Fee recorded on each withdrawal (default 2)
    #[arg(long, env = "LUCRUM_WITHDRAWAL_FEE", global = true)]
    pub withdrawal_fee: Option<Decimal>,

    /// Base URL for referral links
    #[arg(long, env = "LUCRUM_REFERRAL_LINK_BASE", global = true)]
    pub referral_link_base: Option<String>,

    /// Days a voucher stays redeemable (default 30)
    #[arg(long, env = "LUCRUM_VOUCHER_VALIDITY_DAYS", global = true)]
    pub voucher_validity_days: Option<i64>,
}

impl ConfigArgs {
    /// Apply the provided overrides on top of the defaults.
    pub fn into_config(self) -> anyhow::Result<LedgerConfig> {
        let defaults = LedgerConfig::default();
        let config = LedgerConfig {
            lucky_commission_rate: self
                .lucky_commission_rate
                .unwrap_or(defaults.lucky_commission_rate),
            profit_rate: self.profit_rate.unwrap_or(defaults.profit_rate),
            min_withdrawal: self.min_withdrawal.unwrap_or(defaults.min_withdrawal),
            withdrawal_fee: self.withdrawal_fee.unwrap_or(defaults.withdrawal_fee),
            referral_link_base: self
                .referral_link_base
                .unwrap_or(defaults.referral_link_base),
            voucher_validity_days: self
                .voucher_validity_days
                .unwrap_or(defaults.voucher_validity_days),
        };
        config.validate()?;
        Ok(config)
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lucky_commission_rate < Decimal::ZERO || self.lucky_commission_rate > Decimal::ONE {
            anyhow::bail!(
                "lucky commission rate must be between 0 and 1, got {}",
                self.lucky_commission_rate
            );
        }
        if self.profit_rate < Decimal::ZERO {
            anyhow::bail!("profit rate must not be negative, got {}", self.profit_rate);
        }
        if self.min_withdrawal <= Decimal::ZERO {
            anyhow::bail!("minimum withdrawal must be positive");
        }
        if self.withdrawal_fee < Decimal::ZERO {
            anyhow::bail!("withdrawal fee must not be negative");
        }
        if !(1..=3650).contains(&self.voucher_validity_days) {
            anyhow::bail!(
                "voucher validity must be between 1 and 3650 days, got {}",
                self.voucher_validity_days
            );
        }
        Ok(())
    }
}
