mod common;

use anyhow::Result;
use common::{create_referred_user, create_user, fund, test_service, test_service_with};
use lucrum::application::AppError;
use lucrum::config::LedgerConfig;
use lucrum::domain::TransactionKind;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_signup_with_referral_code() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;

    assert!(alice.referral_code.starts_with("REF"));
    assert_eq!(alice.referral_code.len(), 9);

    let owner = service.validate_referral_code(&alice.referral_code).await?;
    assert_eq!(owner.id, alice.id);

    let bob = create_referred_user(&service, "bob", &alice).await?;
    assert_eq!(bob.referred_by, Some(alice.id));
    assert_ne!(bob.referral_code, alice.referral_code);

    let info = service.get_account_info("bob").await?;
    assert_eq!(info.referrer.as_deref(), Some("alice"));

    Ok(())
}

#[tokio::test]
async fn test_signup_with_unknown_code_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .create_account(
            "bob".into(),
            "bob@example.com".into(),
            Some("REFFFFFFF".into()),
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidReferralCode(_))));

    // Nothing was created
    assert!(service.list_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_accounts_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "alice").await?;

    let same_name = service
        .create_account("alice".into(), "other@example.com".into(), None)
        .await;
    assert!(matches!(same_name, Err(AppError::AccountAlreadyExists(_))));

    // Emails are compared case-insensitively
    let same_email = service
        .create_account("alice2".into(), "ALICE@example.com".into(), None)
        .await;
    assert!(matches!(same_email, Err(AppError::AccountAlreadyExists(_))));

    let bad_email = service
        .create_account("carol".into(), "not-an-email".into(), None)
        .await;
    assert!(matches!(bad_email, Err(AppError::InvalidInput(_))));

    Ok(())
}

#[tokio::test]
async fn test_referral_commission_credits_referrer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;
    let bob = create_referred_user(&service, "bob", &alice).await?;
    fund(&service, "alice", dec!(10)).await?;

    let result = service
        .add_referral_commission("alice", "bob", dec!(2.5))
        .await?;
    assert_eq!(result.commission_amount, dec!(2.5));
    assert_eq!(result.new_referrer_balance, dec!(12.5));
    assert_eq!(result.total_commission_earned, dec!(2.5));
    assert_eq!(result.transaction.counterparty, Some(bob.id));

    service
        .add_referral_commission("alice", "bob", dec!(1.25))
        .await?;

    let account = service.get_account("alice").await?;
    assert_eq!(account.balance, dec!(13.75));
    assert_eq!(account.commission_earned, dec!(3.75));
    assert_eq!(account.total_earnings_today, dec!(3.75));

    let bonuses = service
        .list_transactions("alice", Some(TransactionKind::ReferralBonus), None)
        .await?;
    assert_eq!(bonuses.len(), 2);

    // The referred account is untouched
    assert_eq!(service.get_account("bob").await?.balance, dec!(0));

    Ok(())
}

#[tokio::test]
async fn test_referral_commission_requires_relationship() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;
    create_referred_user(&service, "bob", &alice).await?;
    create_user(&service, "carol").await?;

    let unrelated = service
        .add_referral_commission("carol", "bob", dec!(1))
        .await;
    assert!(matches!(
        unrelated,
        Err(AppError::InvalidReferralRelationship { .. })
    ));

    // The relationship only points one way
    let reversed = service
        .add_referral_commission("bob", "alice", dec!(1))
        .await;
    assert!(matches!(
        reversed,
        Err(AppError::InvalidReferralRelationship { .. })
    ));

    let zero = service
        .add_referral_commission("alice", "bob", dec!(0))
        .await;
    assert!(matches!(zero, Err(AppError::InvalidAmount(_))));

    assert_eq!(service.get_account("carol").await?.balance, dec!(0));
    assert_eq!(service.get_account("alice").await?.balance, dec!(0));

    Ok(())
}

#[tokio::test]
async fn test_referral_stats() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;
    create_referred_user(&service, "bob", &alice).await?;
    create_referred_user(&service, "carol", &alice).await?;
    create_user(&service, "dave").await?;
    fund(&service, "bob", dec!(40)).await?;

    service
        .add_referral_commission("alice", "bob", dec!(3))
        .await?;
    service
        .add_referral_commission("alice", "bob", dec!(1))
        .await?;
    service
        .add_referral_commission("alice", "carol", dec!(0.5))
        .await?;

    let stats = service.referral_stats("alice").await?;
    assert_eq!(stats.referral_code, alice.referral_code);
    assert_eq!(
        stats.referral_link,
        format!("http://localhost:5173/signup?ref={}", alice.referral_code)
    );
    assert_eq!(stats.total_referred_users, 2);
    assert_eq!(stats.total_commissions, dec!(4.5));
    assert_eq!(stats.user_balance, dec!(4.5));
    assert_eq!(stats.user_commission_earned, dec!(4.5));

    let bob = stats
        .referred_users
        .iter()
        .find(|u| u.username == "bob")
        .expect("bob is listed");
    assert_eq!(bob.commission, dec!(4));
    assert_eq!(bob.balance, dec!(40));
    assert_eq!(bob.email, "bob@example.com");

    let carol = stats
        .referred_users
        .iter()
        .find(|u| u.username == "carol")
        .expect("carol is listed");
    assert_eq!(carol.commission, dec!(0.5));

    // Nobody signed up with dave's code
    let empty = service.referral_stats("dave").await?;
    assert_eq!(empty.total_referred_users, 0);
    assert_eq!(empty.total_commissions, dec!(0));

    Ok(())
}

#[tokio::test]
async fn test_referral_link_uses_configured_base() -> Result<()> {
    let config = LedgerConfig {
        referral_link_base: "https://earn.example".into(),
        ..LedgerConfig::default()
    };
    let (service, _temp) = test_service_with(config).await?;
    let alice = create_user(&service, "alice").await?;

    let link = service.referral_link("alice").await?;
    assert_eq!(
        link,
        format!("https://earn.example/signup?ref={}", alice.referral_code)
    );
    Ok(())
}
