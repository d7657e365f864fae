use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount};

pub type VoucherId = Uuid;

/// Prefix of every generated voucher code.
pub const VOUCHER_CODE_PREFIX: &str = "VOUCHER";

/// Days a voucher stays redeemable after it is generated.
pub const DEFAULT_VOUCHER_VALIDITY_DAYS: i64 = 30;

/// `Active` moves once, to `Used` on redemption or `Expired` when
/// a redemption attempt finds it past its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Active,
    Used,
    Expired,
}

impl VoucherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherStatus::Active => "active",
            VoucherStatus::Used => "used",
            VoucherStatus::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, VoucherStatus::Active)
    }
}

impl FromStr for VoucherStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(VoucherStatus::Active),
            "used" => Ok(VoucherStatus::Used),
            "expired" => Ok(VoucherStatus::Expired),
            other => Err(format!("unknown voucher status: {other}")),
        }
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balance an owner set aside under a shareable code. Whoever redeems the
/// code pays the amount back to the owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    pub code: String,
    pub owner_id: AccountId,
    pub amount: Amount,
    pub status: VoucherStatus,
    pub expires_at: DateTime<Utc>,
    pub redeemed_by: Option<AccountId>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    pub fn new(owner_id: AccountId, amount: Amount, now: DateTime<Utc>, validity_days: i64) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            code: voucher_code_for(id),
            owner_id,
            amount,
            status: VoucherStatus::Active,
            expires_at: now + Duration::days(validity_days),
            redeemed_by: None,
            used_at: None,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// `VOUCHER` + the first twelve hex digits of the id, upper-cased.
pub fn voucher_code_for(id: VoucherId) -> String {
    let simple = id.simple().to_string();
    format!("{}{}", VOUCHER_CODE_PREFIX, simple[..12].to_uppercase())
}

/// Codes are matched case-insensitively, ignoring surrounding whitespace.
pub fn normalize_voucher_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_code_format() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(voucher_code_for(id), "VOUCHER67E5504410B1");
        assert_eq!(normalize_voucher_code(" voucher67e5504410b1 "), "VOUCHER67E5504410B1");
    }

    #[test]
    fn test_expires_after_validity_window() {
        let now = Utc::now();
        let voucher = Voucher::new(Uuid::new_v4(), dec!(25), now, 30);

        assert!(voucher.status.is_active());
        assert_eq!(voucher.expires_at, now + Duration::days(30));
        assert!(!voucher.is_expired_at(now + Duration::days(30)));
        assert!(voucher.is_expired_at(now + Duration::days(30) + Duration::seconds(1)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("USED".parse(), Ok(VoucherStatus::Used));
        assert_eq!(VoucherStatus::Expired.to_string(), "expired");
        assert!("spent".parse::<VoucherStatus>().is_err());
    }
}
