use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount, WithdrawalMethod};

pub type DepositRequestId = Uuid;
pub type WithdrawalId = Uuid;

/// Review state shared by deposit requests and withdrawals.
/// Only `Pending` may transition, and only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReviewStatus::Pending)
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositMethod {
    BankTransfer,
    Crypto,
    Paypal,
    Other,
}

impl DepositMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositMethod::BankTransfer => "bank_transfer",
            DepositMethod::Crypto => "crypto",
            DepositMethod::Paypal => "paypal",
            DepositMethod::Other => "other",
        }
    }
}

impl FromStr for DepositMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "bank_transfer" | "bank" => Ok(DepositMethod::BankTransfer),
            "crypto" => Ok(DepositMethod::Crypto),
            "paypal" => Ok(DepositMethod::Paypal),
            "other" => Ok(DepositMethod::Other),
            other => Err(format!("unknown deposit method: {other}")),
        }
    }
}

impl fmt::Display for DepositMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deposit waiting for an administrator to confirm the funds arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: DepositRequestId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub method: DepositMethod,
    pub address: String,
    pub notes: Option<String>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DepositRequest {
    pub fn new(
        account_id: AccountId,
        amount: Amount,
        method: DepositMethod,
        address: impl Into<String>,
    ) -> Self {
        assert!(amount > Decimal::ZERO, "Deposit amount must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            method,
            address: address.into(),
            notes: None,
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Money already debited from an account, waiting to be paid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub account_id: AccountId,
    pub amount: Amount,
    /// Processing fee, recorded for the payout; not debited from the balance
    pub fee: Amount,
    pub method: WithdrawalMethod,
    pub address: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    pub fn new(
        account_id: AccountId,
        amount: Amount,
        fee: Amount,
        method: WithdrawalMethod,
        address: impl Into<String>,
    ) -> Self {
        assert!(amount > Decimal::ZERO, "Withdrawal amount must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            fee,
            method,
            address: address.into(),
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Amount actually sent out after the fee.
    pub fn net_payout(&self) -> Amount {
        (self.amount - self.fee).max(Decimal::ZERO)
    }
}
