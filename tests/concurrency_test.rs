mod common;

use anyhow::Result;
use common::{create_user, fund, test_service, Catalogue};
use lucrum::application::{AppError, DepositInput, RatingInput};
use lucrum::domain::{Account, TransactionKind, TransactionRecord};
use lucrum::storage::Repository;
use rust_decimal_macros::dec;
use tempfile::TempDir;

async fn test_repository() -> Result<(Repository, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.display());
    let repo = Repository::init(&url).await?;
    Ok((repo, temp_dir))
}

#[tokio::test]
async fn test_stale_version_is_rejected() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let account = Account::new("alice", "alice@example.com");
    assert!(repo.save_account(&account).await?);

    // Two requests read the same version
    let mut first = repo.get_account(account.id).await?.unwrap();
    let mut second = first.clone();

    first.balance = dec!(10);
    let mut tx = repo.begin().await?;
    assert!(Repository::update_account_state(&mut tx, &mut first).await?);
    tx.commit().await?;
    assert_eq!(first.version, 1);

    second.balance = dec!(99);
    let mut tx = repo.begin().await?;
    assert!(!Repository::update_account_state(&mut tx, &mut second).await?);
    drop(tx);
    assert_eq!(second.version, 0);

    let stored = repo.get_account(account.id).await?.unwrap();
    assert_eq!(stored.balance, dec!(10));
    assert_eq!(stored.version, 1);

    Ok(())
}

#[tokio::test]
async fn test_rolled_back_write_leaves_no_record() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let mut account = Account::new("bob", "bob@example.com");
    assert!(repo.save_account(&account).await?);

    account.balance = dec!(5);
    let mut record =
        TransactionRecord::new(account.id, TransactionKind::Deposit, dec!(5), dec!(0), dec!(5));

    let mut tx = repo.begin().await?;
    assert!(Repository::update_account_state(&mut tx, &mut account).await?);
    Repository::insert_transaction(&mut tx, &mut record).await?;
    assert_eq!(record.sequence, 1);
    tx.rollback().await?;

    let stored = repo.get_account(account.id).await?.unwrap();
    assert_eq!(stored.balance, dec!(0));
    assert_eq!(stored.version, 0);
    assert!(repo.list_transactions().await?.is_empty());

    // The sequence counter rolled back with the rest
    let mut tx = repo.begin().await?;
    let mut next =
        TransactionRecord::new(account.id, TransactionKind::Deposit, dec!(1), dec!(0), dec!(1));
    Repository::insert_transaction(&mut tx, &mut next).await?;
    tx.commit().await?;
    assert_eq!(next.sequence, 1);

    Ok(())
}

#[tokio::test]
async fn test_sequential_writes_bump_version() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let catalogue = Catalogue::create(&service).await?;
    create_user(&service, "carol").await?;

    fund(&service, "carol", dec!(100)).await?;
    service
        .deposit(
            "carol",
            DepositInput {
                amount: dec!(20),
                is_lucky_order_commission: true,
            },
        )
        .await?;
    service
        .rate_product(
            "carol",
            RatingInput {
                product_id: catalogue.headphones.id,
                rating: 5,
            },
        )
        .await?;

    let account = service.get_account("carol").await?;
    assert_eq!(account.version, 3);
    // 100 + 20.01 + 1
    assert_eq!(account.balance, dec!(121.01));

    let report = service.check_integrity().await?;
    assert!(report.is_ok(), "{:?}", report.issues);

    Ok(())
}

#[tokio::test]
async fn test_parallel_deposits_never_lose_updates() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "dave").await?;

    let input = DepositInput {
        amount: dec!(10),
        is_lucky_order_commission: false,
    };
    let results = deposit_four_times(&service, input).await;

    // Each deposit either landed or was refused as a concurrent update;
    // the stored balance agrees with the log either way.
    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(err, AppError::ConcurrentUpdate(name) if name == "dave"),
                "unexpected error: {err:?}"
            );
        }
    }
    let landed = results.iter().filter(|r| r.is_ok()).count();
    assert!(landed >= 1);
    let account = service.get_account("dave").await?;
    assert_eq!(account.balance, dec!(10) * rust_decimal::Decimal::from(landed as u64));

    let report = service.check_integrity().await?;
    assert!(report.is_ok(), "{:?}", report.issues);

    Ok(())
}

async fn deposit_four_times(
    service: &lucrum::application::LedgerService,
    input: DepositInput,
) -> Vec<Result<(), AppError>> {
    let (a, b, c, d) = tokio::join!(
        service.deposit("dave", input),
        service.deposit("dave", input),
        service.deposit("dave", input),
        service.deposit("dave", input),
    );
    [a, b, c, d]
        .into_iter()
        .map(|r| r.map(|_| ()))
        .collect()
}

#[tokio::test]
async fn test_duplicate_account_insert_is_reported() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let first = Account::new("erin", "erin@example.com");
    assert!(repo.save_account(&first).await?);

    let same_name = Account::new("erin", "other@example.com");
    assert!(!repo.save_account(&same_name).await?);
    let same_email = Account::new("erin2", "ERIN@example.com");
    assert!(!repo.save_account(&same_email).await?);

    assert_eq!(repo.list_accounts().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_simultaneous_signups_with_one_username() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let (first, second) = tokio::join!(
        service.create_account("frank".into(), "frank@example.com".into(), None),
        service.create_account("frank".into(), "frank2@example.com".into(), None),
    );

    // Exactly one signup wins; the other is a clean duplicate error
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(err, AppError::AccountAlreadyExists(name) if name == "frank"),
                "unexpected error: {err:?}"
            );
        }
    }
    assert_eq!(service.list_accounts().await?.len(), 1);

    Ok(())
}
