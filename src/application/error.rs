use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Amount, LedgerError, ReviewStatus, VoucherStatus};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Invalid referral code: {0}")]
    InvalidReferralCode(String),

    #[error("{referred} was not referred by {referrer}")]
    InvalidReferralRelationship { referrer: String, referred: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: balance {balance}, required {required}")]
    InsufficientBalance { balance: Amount, required: Amount },

    #[error("Minimum withdrawal amount is {minimum}")]
    BelowMinimumWithdrawal { amount: Amount, minimum: Amount },

    #[error("Withdrawal information not set up for {0}")]
    WithdrawalNotConfigured(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Product is not active: {0}")]
    ProductInactive(String),

    #[error("Only {required}-star ratings are allowed, got {given}")]
    InvalidRating { given: u8, required: u8 },

    #[error("'{product}' was already rated on {day}")]
    AlreadyRatedToday { product: String, day: NaiveDate },

    #[error("You must rate \"{blocking}\" before rating \"{requested}\"")]
    OutOfOrder { requested: String, blocking: String },

    #[error("Deposit request not found: {0}")]
    DepositRequestNotFound(String),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    #[error("{kind} {id} is not pending (status: {status})")]
    NotPending {
        kind: &'static str,
        id: String,
        status: ReviewStatus,
    },

    #[error("Invalid voucher code: {0}")]
    VoucherNotFound(String),

    #[error("Voucher {code} is not active (status: {status})")]
    VoucherUnavailable { code: String, status: VoucherStatus },

    #[error("Voucher {0} has expired")]
    VoucherExpired(String),

    #[error("Chat message not found: {0}")]
    ChatMessageNotFound(String),

    #[error("Account {0} was modified by another request; reload and try again")]
    ConcurrentUpdate(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(_) | LedgerError::Overflow => {
                AppError::InvalidAmount(err.to_string())
            }
            LedgerError::InsufficientBalance { balance, required } => {
                AppError::InsufficientBalance { balance, required }
            }
            LedgerError::BelowMinimum { amount, minimum } => {
                AppError::BelowMinimumWithdrawal { amount, minimum }
            }
        }
    }
}
