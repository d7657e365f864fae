use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Amount;

pub type AccountId = Uuid;

/// Prefix of every generated referral code.
pub const REFERRAL_CODE_PREFIX: &str = "REF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalMethod {
    #[serde(rename = "TRC20")]
    Trc20,
    #[serde(rename = "ERC20")]
    Erc20,
    #[serde(rename = "BEP20")]
    Bep20,
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
}

impl WithdrawalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalMethod::Trc20 => "TRC20",
            WithdrawalMethod::Erc20 => "ERC20",
            WithdrawalMethod::Bep20 => "BEP20",
            WithdrawalMethod::BankTransfer => "Bank Transfer",
        }
    }
}

impl FromStr for WithdrawalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], " ").as_str() {
            "trc20" => Ok(WithdrawalMethod::Trc20),
            "erc20" => Ok(WithdrawalMethod::Erc20),
            "bep20" => Ok(WithdrawalMethod::Bep20),
            "bank transfer" | "bank" => Ok(WithdrawalMethod::BankTransfer),
            other => Err(format!("unknown withdrawal method: {other}")),
        }
    }
}

impl fmt::Display for WithdrawalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account and the money it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    /// Never negative at rest.
    pub balance: Amount,
    pub total_earnings_today: Amount,
    /// Lifetime commissions received: lucky order and referral.
    pub commission_earned: Amount,
    pub lucky_order_count: i64,
    pub referral_code: String,
    pub referred_by: Option<AccountId>,
    pub withdrawal_method: Option<WithdrawalMethod>,
    pub withdrawal_address: Option<String>,
    /// UTC day `total_earnings_today` refers to.
    pub last_daily_reset: Option<NaiveDate>,
    /// Bumped by the repository on every balance write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            username: username.into(),
            email: email.into().trim().to_lowercase(),
            balance: Decimal::ZERO,
            total_earnings_today: Decimal::ZERO,
            commission_earned: Decimal::ZERO,
            lucky_order_count: 0,
            referral_code: referral_code_for(id),
            referred_by: None,
            withdrawal_method: None,
            withdrawal_address: None,
            last_daily_reset: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_referrer(mut self, referrer: AccountId) -> Self {
        self.referred_by = Some(referrer);
        self
    }

    pub fn was_referred_by(&self, referrer: AccountId) -> bool {
        self.referred_by == Some(referrer)
    }

    pub fn has_withdrawal_info(&self) -> bool {
        self.withdrawal_method.is_some() && self.withdrawal_address.is_some()
    }

    /// Reset the daily earnings counter when `today` differs from the last reset day.
    pub fn roll_daily(&mut self, today: NaiveDate) {
        if self.last_daily_reset != Some(today) {
            self.total_earnings_today = Decimal::ZERO;
            self.last_daily_reset = Some(today);
        }
    }

    /// Record earnings made on `today`. The counter saturates instead of overflowing.
    pub fn record_earnings(&mut self, amount: Amount, today: NaiveDate) {
        self.roll_daily(today);
        self.total_earnings_today = self.total_earnings_today.saturating_add(amount);
    }

    /// Record a commission: counts toward lifetime commissions and today's earnings.
    pub fn record_commission(&mut self, amount: Amount, today: NaiveDate) {
        self.commission_earned = self.commission_earned.saturating_add(amount);
        self.record_earnings(amount, today);
    }
}

/// Referral code derived from the account id: `REF` + last six hex digits, upper-cased.
pub fn referral_code_for(id: AccountId) -> String {
    let simple = id.simple().to_string();
    let tail = &simple[simple.len() - 6..];
    format!("{}{}", REFERRAL_CODE_PREFIX, tail.to_uppercase())
}

/// Link a user can share to sign up with their referral code.
pub fn referral_link(base_url: &str, referral_code: &str) -> String {
    format!(
        "{}/signup?ref={}",
        base_url.trim_end_matches('/'),
        referral_code
    )
}
