//! Balance arithmetic for every operation that moves money in or out of an
//! account. Nothing here touches storage: callers load the current balance,
//! ask for the outcome, and persist it themselves.

use rust_decimal::Decimal;
use thiserror::Error;

use super::Amount;

/// Lucky order commission rate: 0.05% of the deposited amount.
pub const LUCKY_ORDER_COMMISSION_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 4);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("insufficient balance: balance {balance}, required {required}")]
    InsufficientBalance { balance: Amount, required: Amount },

    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    #[error("amount out of range: the result exceeds the largest representable balance")]
    Overflow,
}

/// Outcome of crediting a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositOutcome {
    pub deposit_amount: Amount,
    pub commission: Amount,
    pub total_received: Amount,
    pub new_balance: Amount,
}

/// Outcome of spending a product price on a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingOutcome {
    pub new_balance: Amount,
    pub profit: Amount,
}

/// Credit a deposit, adding the lucky order commission when flagged.
pub fn compute_deposit(
    current_balance: Amount,
    amount: Amount,
    is_lucky_order_commission: bool,
) -> Result<DepositOutcome, LedgerError> {
    compute_deposit_with_rate(
        current_balance,
        amount,
        is_lucky_order_commission,
        LUCKY_ORDER_COMMISSION_RATE,
    )
}

/// Same as [`compute_deposit`] with an explicit commission rate.
pub fn compute_deposit_with_rate(
    current_balance: Amount,
    amount: Amount,
    is_lucky_order_commission: bool,
    commission_rate: Decimal,
) -> Result<DepositOutcome, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let commission = if is_lucky_order_commission {
        amount.checked_mul(commission_rate).ok_or(LedgerError::Overflow)?
    } else {
        Decimal::ZERO
    };
    let total_received = amount.checked_add(commission).ok_or(LedgerError::Overflow)?;
    let new_balance = current_balance
        .checked_add(total_received)
        .ok_or(LedgerError::Overflow)?;

    Ok(DepositOutcome {
        deposit_amount: amount,
        commission,
        total_received,
        new_balance,
    })
}

/// Spend `product_price` from the balance and credit `profit_rate * product_price`.
pub fn compute_rating_commission(
    current_balance: Amount,
    product_price: Amount,
    profit_rate: Decimal,
) -> Result<RatingOutcome, LedgerError> {
    if product_price <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(product_price));
    }
    if current_balance < product_price {
        return Err(LedgerError::InsufficientBalance {
            balance: current_balance,
            required: product_price,
        });
    }

    let profit = profit_rate
        .checked_mul(product_price)
        .ok_or(LedgerError::Overflow)?;
    let new_balance = (current_balance - product_price)
        .checked_add(profit)
        .ok_or(LedgerError::Overflow)?;
    Ok(RatingOutcome {
        new_balance,
        profit,
    })
}

/// Debit a withdrawal. Returns the new balance.
pub fn compute_withdrawal(
    current_balance: Amount,
    amount: Amount,
    minimum: Amount,
) -> Result<Amount, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    if amount < minimum {
        return Err(LedgerError::BelowMinimum { amount, minimum });
    }
    if amount > current_balance {
        return Err(LedgerError::InsufficientBalance {
            balance: current_balance,
            required: amount,
        });
    }
    current_balance
        .checked_sub(amount)
        .ok_or(LedgerError::Overflow)
}

/// Plain debit with no minimum (voucher generation). Returns the new balance.
pub fn compute_debit(current_balance: Amount, amount: Amount) -> Result<Amount, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    if amount > current_balance {
        return Err(LedgerError::InsufficientBalance {
            balance: current_balance,
            required: amount,
        });
    }
    current_balance
        .checked_sub(amount)
        .ok_or(LedgerError::Overflow)
}

/// Plain credit (referral bonuses, refunds, redeemed vouchers). Returns the new balance.
pub fn compute_credit(current_balance: Amount, amount: Amount) -> Result<Amount, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    current_balance
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_commission_rate_is_five_basis_points() {
        assert_eq!(LUCKY_ORDER_COMMISSION_RATE, dec!(0.0005));
    }

    #[test]
    fn test_lucky_deposit_scenario() {
        let outcome = compute_deposit(Decimal::ZERO, dec!(100.00), true).unwrap();

        assert_eq!(outcome.deposit_amount, dec!(100.00));
        assert_eq!(outcome.commission, dec!(0.0500));
        assert_eq!(outcome.total_received, dec!(100.05));
        assert_eq!(outcome.new_balance, dec!(100.05));
    }

    #[test]
    fn test_lucky_deposit_on_existing_balance() {
        for (balance, amount) in [
            (dec!(0), dec!(0.01)),
            (dec!(12.34), dec!(250)),
            (dec!(1000), dec!(999.99)),
        ] {
            let outcome = compute_deposit(balance, amount, true).unwrap();
            assert_eq!(outcome.commission, amount * dec!(0.0005));
            assert_eq!(outcome.new_balance, balance + amount + outcome.commission);
        }
    }

    #[test]
    fn test_plain_deposit_has_no_commission() {
        let outcome = compute_deposit(dec!(10), dec!(40), false).unwrap();

        assert_eq!(outcome.commission, Decimal::ZERO);
        assert_eq!(outcome.total_received, dec!(40));
        assert_eq!(outcome.new_balance, dec!(50));
    }

    #[test]
    fn test_deposit_rejects_non_positive_amounts() {
        for amount in [dec!(0), dec!(-0.01), dec!(-100)] {
            assert_eq!(
                compute_deposit(dec!(10), amount, true),
                Err(LedgerError::InvalidAmount(amount))
            );
        }
    }

    #[test]
    fn test_deposit_replay_doubles_the_increase() {
        // No de-duplication: applying the same deposit twice credits twice.
        let first = compute_deposit(Decimal::ZERO, dec!(100), true).unwrap();
        let second = compute_deposit(first.new_balance, dec!(100), true).unwrap();

        assert_eq!(second.new_balance, dec!(200.10));
    }

    #[test]
    fn test_rating_commission() {
        let outcome = compute_rating_commission(dec!(100), dec!(40), dec!(1.05)).unwrap();

        assert_eq!(outcome.profit, dec!(42));
        assert_eq!(outcome.new_balance, dec!(102));
    }

    #[test]
    fn test_rating_with_exact_balance() {
        let outcome = compute_rating_commission(dec!(40), dec!(40), dec!(0.1)).unwrap();

        assert_eq!(outcome.profit, dec!(4));
        assert_eq!(outcome.new_balance, dec!(4));
    }

    #[test]
    fn test_rating_insufficient_balance() {
        let result = compute_rating_commission(dec!(39.99), dec!(40), dec!(1.05));

        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                balance: dec!(39.99),
                required: dec!(40),
            })
        );
    }

    #[test]
    fn test_rating_rejects_free_products() {
        assert!(matches!(
            compute_rating_commission(dec!(10), dec!(0), dec!(1.05)),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_withdrawal() {
        assert_eq!(compute_withdrawal(dec!(50), dec!(10), dec!(10)), Ok(dec!(40)));
        assert_eq!(
            compute_withdrawal(dec!(50), dec!(9.99), dec!(10)),
            Err(LedgerError::BelowMinimum {
                amount: dec!(9.99),
                minimum: dec!(10),
            })
        );
        assert!(matches!(
            compute_withdrawal(dec!(50), dec!(50.01), dec!(10)),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_debit() {
        assert_eq!(compute_debit(dec!(20), dec!(20)), Ok(dec!(0)));
        assert_eq!(compute_debit(dec!(20), dec!(0.5)), Ok(dec!(19.5)));
        assert_eq!(
            compute_debit(dec!(20), dec!(20.01)),
            Err(LedgerError::InsufficientBalance {
                balance: dec!(20),
                required: dec!(20.01),
            })
        );
        assert!(matches!(
            compute_debit(dec!(20), dec!(-1)),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_credit() {
        assert_eq!(compute_credit(dec!(1), dec!(2.5)), Ok(dec!(3.5)));
        assert!(compute_credit(dec!(1), dec!(0)).is_err());
    }

    #[test]
    fn test_deposit_at_the_decimal_limit_is_an_error() {
        // Commission on the largest amount pushes the total past the limit
        assert_eq!(
            compute_deposit(Decimal::ZERO, Decimal::MAX, true),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            compute_deposit(Decimal::MAX, Decimal::MAX, false),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            compute_deposit(Decimal::ZERO, Decimal::MAX, false).map(|o| o.new_balance),
            Ok(Decimal::MAX)
        );
    }

    #[test]
    fn test_rating_and_credit_at_the_decimal_limit_are_errors() {
        assert_eq!(
            compute_rating_commission(Decimal::MAX, dec!(10), dec!(2)),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            compute_rating_commission(dec!(10), dec!(10), Decimal::MAX),
            Err(LedgerError::Overflow)
        );
        assert_eq!(compute_credit(Decimal::MAX, dec!(1)), Err(LedgerError::Overflow));
    }
}
