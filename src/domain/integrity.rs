use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::{Account, AccountId, Amount, TransactionId, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IntegrityIssue {
    NegativeBalance {
        username: String,
        balance: Amount,
    },
    /// Stored balance differs from the sum of the account's transactions.
    BalanceMismatch {
        username: String,
        stored: Amount,
        replayed: Amount,
    },
    /// A record's resulting balance does not follow from the previous one.
    BrokenChain {
        username: String,
        sequence: i64,
        expected_previous: Amount,
        recorded_previous: Amount,
    },
    OrphanTransaction {
        transaction_id: TransactionId,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::NegativeBalance { username, balance } => {
                write!(f, "{} has a negative balance ({})", username, balance)
            }
            IntegrityIssue::BalanceMismatch {
                username,
                stored,
                replayed,
            } => write!(
                f,
                "{} balance is {} but its transactions add up to {}",
                username, stored, replayed
            ),
            IntegrityIssue::BrokenChain {
                username,
                sequence,
                expected_previous,
                recorded_previous,
            } => write!(
                f,
                "{} transaction #{} starts from {} instead of {}",
                username, sequence, recorded_previous, expected_previous
            ),
            IntegrityIssue::OrphanTransaction { transaction_id } => {
                write!(f, "transaction {} references an unknown account", transaction_id)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub has_sequence_gaps: bool,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        !self.has_sequence_gaps && self.issues.is_empty()
    }
}

/// Replay every account's transactions in sequence order and compare them to
/// the stored balances. `transactions` may be in any order.
pub fn build_integrity_report(
    accounts: &[Account],
    transactions: &[TransactionRecord],
) -> IntegrityReport {
    let mut ordered: Vec<&TransactionRecord> = transactions.iter().collect();
    ordered.sort_by_key(|t| t.sequence);

    let has_sequence_gaps = ordered
        .iter()
        .zip(ordered.iter().skip(1))
        .any(|(a, b)| b.sequence != a.sequence + 1);

    let by_id: HashMap<AccountId, &Account> = accounts.iter().map(|a| (a.id, a)).collect();
    let mut running: HashMap<AccountId, Amount> = HashMap::new();
    let mut issues = Vec::new();

    for record in &ordered {
        let Some(account) = by_id.get(&record.account_id) else {
            issues.push(IntegrityIssue::OrphanTransaction {
                transaction_id: record.id,
            });
            continue;
        };

        let balance = running.entry(record.account_id).or_insert(Decimal::ZERO);
        let recorded_previous = record.previous_balance();
        if recorded_previous != *balance {
            issues.push(IntegrityIssue::BrokenChain {
                username: account.username.clone(),
                sequence: record.sequence,
                expected_previous: *balance,
                recorded_previous,
            });
        }
        *balance = balance.saturating_add(record.balance_delta());
    }

    for account in accounts {
        let replayed = running.get(&account.id).copied().unwrap_or(Decimal::ZERO);
        if replayed != account.balance {
            issues.push(IntegrityIssue::BalanceMismatch {
                username: account.username.clone(),
                stored: account.balance,
                replayed,
            });
        }
        if account.balance < Decimal::ZERO {
            issues.push(IntegrityIssue::NegativeBalance {
                username: account.username.clone(),
                balance: account.balance,
            });
        }
    }

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        has_sequence_gaps,
        issues,
    }
}
