use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Funds added to the account, with an optional lucky order commission
    Deposit,
    /// Product price spent on a rating, plus the rating profit
    RatingCommission,
    /// Commission paid to a referrer
    ReferralBonus,
    /// Funds leaving the account for an external address
    Withdrawal,
    /// A rejected withdrawal returned to the balance
    WithdrawalRefund,
    /// Balance locked into a voucher by its owner
    VoucherGeneration,
    /// A redeemed voucher paid back to its owner
    VoucherRedemption,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 7] = [
        TransactionKind::Deposit,
        TransactionKind::RatingCommission,
        TransactionKind::ReferralBonus,
        TransactionKind::Withdrawal,
        TransactionKind::WithdrawalRefund,
        TransactionKind::VoucherGeneration,
        TransactionKind::VoucherRedemption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::RatingCommission => "rating_commission",
            TransactionKind::ReferralBonus => "referral_bonus",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::WithdrawalRefund => "withdrawal_refund",
            TransactionKind::VoucherGeneration => "voucher_generation",
            TransactionKind::VoucherRedemption => "voucher_redemption",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        TransactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown transaction kind: {s}"))
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One balance mutation of one account. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Monotonically increasing sequence number for ordering
    pub sequence: i64,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Principal: deposit amount, product price, bonus or withdrawal amount
    pub amount: Amount,
    /// Commission or profit credited on top of the principal
    pub commission: Amount,
    /// Account balance right after this transaction
    pub resulting_balance: Amount,
    /// The other account involved, e.g. the referred user behind a referral bonus
    pub counterparty: Option<AccountId>,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a new record. Sequence number must be assigned by the repository.
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        amount: Amount,
        commission: Amount,
        resulting_balance: Amount,
    ) -> Self {
        assert!(amount > Decimal::ZERO, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            account_id,
            kind,
            amount,
            commission,
            resulting_balance,
            counterparty: None,
            description: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: AccountId) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Signed change this record applied to the account balance. Saturates
    /// so that replaying a corrupted log reports a mismatch instead of panicking.
    pub fn balance_delta(&self) -> Amount {
        match self.kind {
            TransactionKind::Deposit => self.amount.saturating_add(self.commission),
            TransactionKind::RatingCommission => self.commission.saturating_sub(self.amount),
            TransactionKind::ReferralBonus => self.commission,
            TransactionKind::Withdrawal | TransactionKind::VoucherGeneration => -self.amount,
            TransactionKind::WithdrawalRefund | TransactionKind::VoucherRedemption => self.amount,
        }
    }

    /// Balance the account held before this record was applied.
    pub fn previous_balance(&self) -> Amount {
        self.resulting_balance.saturating_sub(self.balance_delta())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn record(kind: TransactionKind, amount: Amount, commission: Amount) -> TransactionRecord {
        TransactionRecord::new(Uuid::new_v4(), kind, amount, commission, dec!(100))
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>(), Ok(kind));
        }
        assert_eq!(
            "rating-commission".parse::<TransactionKind>(),
            Ok(TransactionKind::RatingCommission)
        );
        assert!("transfer".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_balance_delta_per_kind() {
        assert_eq!(
            record(TransactionKind::Deposit, dec!(100), dec!(0.05)).balance_delta(),
            dec!(100.05)
        );
        assert_eq!(
            record(TransactionKind::RatingCommission, dec!(40), dec!(42)).balance_delta(),
            dec!(2)
        );
        assert_eq!(
            record(TransactionKind::ReferralBonus, dec!(3), dec!(3)).balance_delta(),
            dec!(3)
        );
        assert_eq!(
            record(TransactionKind::Withdrawal, dec!(25), dec!(0)).balance_delta(),
            dec!(-25)
        );
        assert_eq!(
            record(TransactionKind::WithdrawalRefund, dec!(25), dec!(0)).balance_delta(),
            dec!(25)
        );
        assert_eq!(
            record(TransactionKind::VoucherGeneration, dec!(15), dec!(0)).balance_delta(),
            dec!(-15)
        );
        assert_eq!(
            record(TransactionKind::VoucherRedemption, dec!(15), dec!(0)).balance_delta(),
            dec!(15)
        );
    }

    #[test]
    fn test_previous_balance() {
        let deposit = record(TransactionKind::Deposit, dec!(60), dec!(0));
        assert_eq!(deposit.previous_balance(), dec!(40));
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_record_requires_positive_amount() {
        record(TransactionKind::Deposit, dec!(0), dec!(0));
    }
}
