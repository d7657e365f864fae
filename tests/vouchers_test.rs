mod common;

use anyhow::Result;
use chrono::Duration;
use common::{create_user, fund, parse_date, test_service, test_service_with};
use lucrum::application::AppError;
use lucrum::config::LedgerConfig;
use lucrum::domain::{TransactionKind, VoucherStatus};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_generate_voucher_debits_owner() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;
    fund(&service, "alice", dec!(50)).await?;

    let day = parse_date("2024-03-01");
    let receipt = service.generate_voucher_at("alice", dec!(20), day).await?;

    assert_eq!(receipt.new_balance, dec!(30));
    assert_eq!(receipt.voucher.owner_id, alice.id);
    assert_eq!(receipt.voucher.status, VoucherStatus::Active);
    assert_eq!(receipt.voucher.expires_at, day + Duration::days(30));
    assert!(receipt.voucher.code.starts_with("VOUCHER"));
    assert_eq!(receipt.transaction.kind, TransactionKind::VoucherGeneration);
    assert_eq!(receipt.transaction.resulting_balance, dec!(30));

    assert_eq!(service.get_account("alice").await?.balance, dec!(30));
    let vouchers = service.list_vouchers(Some("alice"), None).await?;
    assert_eq!(vouchers.len(), 1);
    assert_eq!(vouchers[0].code, receipt.voucher.code);

    let too_much = service.generate_voucher("alice", dec!(30.01)).await;
    assert!(matches!(too_much, Err(AppError::InsufficientBalance { .. })));
    let nothing = service.generate_voucher("alice", dec!(0)).await;
    assert!(matches!(nothing, Err(AppError::InvalidAmount(_))));

    Ok(())
}

#[tokio::test]
async fn test_redeeming_pays_the_owner() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "alice").await?;
    let bob = create_user(&service, "bob").await?;
    fund(&service, "alice", dec!(50)).await?;
    fund(&service, "bob", dec!(5)).await?;

    let day = parse_date("2024-03-01");
    let receipt = service.generate_voucher_at("alice", dec!(20), day).await?;

    // Codes are matched case-insensitively
    let code = receipt.voucher.code.to_lowercase();
    let redemption = service
        .redeem_voucher_at("bob", &code, day + Duration::days(2))
        .await?;

    assert_eq!(redemption.owner, "alice");
    assert_eq!(redemption.owner_new_balance, dec!(50));
    assert_eq!(redemption.voucher.status, VoucherStatus::Used);
    assert_eq!(redemption.voucher.redeemed_by, Some(bob.id));
    assert_eq!(redemption.transaction.kind, TransactionKind::VoucherRedemption);
    assert_eq!(redemption.transaction.counterparty, Some(bob.id));

    assert_eq!(service.get_account("alice").await?.balance, dec!(50));
    assert_eq!(service.get_account("bob").await?.balance, dec!(5));

    let used = service
        .list_vouchers(None, Some(VoucherStatus::Used))
        .await?;
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].redeemed_by, Some(bob.id));

    let report = service.check_integrity().await?;
    assert!(report.is_ok(), "{:?}", report.issues);

    Ok(())
}

#[tokio::test]
async fn test_voucher_redeems_only_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "carol").await?;
    create_user(&service, "dave").await?;
    fund(&service, "carol", dec!(40)).await?;

    let receipt = service.generate_voucher("carol", dec!(10)).await?;
    service.redeem_voucher("dave", &receipt.voucher.code).await?;

    let again = service.redeem_voucher("dave", &receipt.voucher.code).await;
    assert!(matches!(
        again,
        Err(AppError::VoucherUnavailable {
            status: VoucherStatus::Used,
            ..
        })
    ));
    assert_eq!(service.get_account("carol").await?.balance, dec!(40));

    let unknown = service.redeem_voucher("dave", "VOUCHERNOPE").await;
    assert!(matches!(unknown, Err(AppError::VoucherNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_expired_voucher_is_marked_and_refused() -> Result<()> {
    let config = LedgerConfig {
        voucher_validity_days: 7,
        ..LedgerConfig::default()
    };
    let (service, _temp) = test_service_with(config).await?;
    create_user(&service, "erin").await?;
    create_user(&service, "frank").await?;
    fund(&service, "erin", dec!(30)).await?;

    let day = parse_date("2024-03-01");
    let receipt = service.generate_voucher_at("erin", dec!(12), day).await?;
    assert_eq!(receipt.voucher.expires_at, day + Duration::days(7));

    let late = service
        .redeem_voucher_at("frank", &receipt.voucher.code, day + Duration::days(8))
        .await;
    assert!(matches!(late, Err(AppError::VoucherExpired(_))));

    // The expiry sticks; the set-aside amount stays with the voucher
    let expired = service
        .list_vouchers(Some("erin"), Some(VoucherStatus::Expired))
        .await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(service.get_account("erin").await?.balance, dec!(18));

    let retry = service
        .redeem_voucher_at("frank", &receipt.voucher.code, day + Duration::days(1))
        .await;
    assert!(matches!(
        retry,
        Err(AppError::VoucherUnavailable {
            status: VoucherStatus::Expired,
            ..
        })
    ));

    Ok(())
}

#[tokio::test]
async fn test_redeemer_must_exist() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "gina").await?;
    fund(&service, "gina", dec!(10)).await?;
    let receipt = service.generate_voucher("gina", dec!(10)).await?;

    let stranger = service.redeem_voucher("nobody", &receipt.voucher.code).await;
    assert!(matches!(stranger, Err(AppError::AccountNotFound(_))));

    // Still redeemable by a real account
    let active = service
        .list_vouchers(None, Some(VoucherStatus::Active))
        .await?;
    assert_eq!(active.len(), 1);

    Ok(())
}
