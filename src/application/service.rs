use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    build_integrity_report, compute_credit, compute_debit, compute_deposit_with_rate,
    compute_rating_commission, compute_withdrawal, first_unrated_before, normalize_voucher_code,
    referral_link, support_conversation_id, Account, AccountId, Amount, ChatMessage,
    ChatMessageId, DepositMethod, DepositRequest, DepositRequestId, IntegrityReport,
    MediaAttachment, MessageType, Product, ProductId, Rating, ReviewStatus, SenderType,
    TransactionKind, TransactionRecord, Voucher, VoucherStatus, Withdrawal,
    WithdrawalId, WithdrawalMethod, REQUIRED_STARS,
};
use crate::storage::Repository;

use super::AppError;

/// Application service providing high-level operations for the ledger.
/// This is the request boundary: every client (CLI, tests) goes through it.
pub struct LedgerService {
    repo: Repository,
    config: LedgerConfig,
}

/// Typed deposit request body.
#[derive(Debug, Clone, Copy)]
pub struct DepositInput {
    pub amount: Amount,
    pub is_lucky_order_commission: bool,
}

/// Result of crediting a deposit
#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub deposit_amount: Amount,
    pub commission: Amount,
    pub total_received: Amount,
    pub new_balance: Amount,
    pub transaction: TransactionRecord,
}

/// Typed rating request body.
#[derive(Debug, Clone, Copy)]
pub struct RatingInput {
    pub product_id: ProductId,
    pub rating: u8,
}

/// Result of a completed rating task
#[derive(Debug, Clone, Serialize)]
pub struct RatingReceipt {
    pub rating: Rating,
    pub product_name: String,
    pub new_balance: Amount,
    pub profit: Amount,
    pub transaction: TransactionRecord,
}

/// Result of paying a referral commission
#[derive(Debug, Clone, Serialize)]
pub struct ReferralCommissionResult {
    pub commission_amount: Amount,
    pub new_referrer_balance: Amount,
    pub total_commission_earned: Amount,
    pub transaction: TransactionRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferredUser {
    pub username: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
    pub balance: Amount,
    /// Referral commissions this user generated for the referrer
    pub commission: Amount,
}

/// Direct referrals of one account and what they earned it.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    pub referral_code: String,
    pub referral_link: String,
    pub total_referred_users: usize,
    pub total_commissions: Amount,
    pub user_balance: Amount,
    pub user_commission_earned: Amount,
    pub referred_users: Vec<ReferredUser>,
}

/// Result of requesting or settling a withdrawal
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalResult {
    pub withdrawal: Withdrawal,
    pub new_balance: Amount,
    /// Balance-changing record, if the step moved money
    pub transaction: Option<TransactionRecord>,
}

/// Result of setting balance aside in a voucher
#[derive(Debug, Clone, Serialize)]
pub struct VoucherReceipt {
    pub voucher: Voucher,
    pub new_balance: Amount,
    pub transaction: TransactionRecord,
}

/// Result of redeeming a voucher. The owner is paid; the redeemer's balance
/// does not change.
#[derive(Debug, Clone, Serialize)]
pub struct VoucherRedemption {
    pub voucher: Voucher,
    pub owner: String,
    pub owner_new_balance: Amount,
    pub transaction: TransactionRecord,
}

/// Detailed account information
pub struct AccountInfo {
    pub account: Account,
    pub referrer: Option<String>,
    pub referred_count: usize,
    pub transaction_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Extra row written in the same database transaction as a balance change.
enum SideWrite<'a> {
    None,
    Rating(&'a Rating),
    NewWithdrawal(&'a Withdrawal),
    SettleDeposit(DepositRequestId, ReviewStatus, DateTime<Utc>),
    SettleWithdrawal(WithdrawalId, ReviewStatus, DateTime<Utc>),
    NewVoucher(&'a Voucher),
    RedeemVoucher(&'a Voucher, AccountId, DateTime<Utc>),
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Accounts
    // ========================

    /// Sign up a new account, optionally linked to a referrer by code.
    pub async fn create_account(
        &self,
        username: String,
        email: String,
        referral_code: Option<String>,
    ) -> Result<Account, AppError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::InvalidInput("username is required".to_string()));
        }
        if !email.contains('@') {
            return Err(AppError::InvalidInput(format!("invalid email: {}", email)));
        }

        let referrer = match referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(self.validate_referral_code(code).await?),
            _ => None,
        };

        // The UNIQUE columns decide between concurrent signups. Referral
        // codes come from the last six hex digits of the id, so a clash on
        // neither name nor email means the code collided: draw again.
        let account = loop {
            let mut account = Account::new(username.clone(), email.clone());
            if let Some(referrer) = &referrer {
                account = account.with_referrer(referrer.id);
            }
            if self.repo.save_account(&account).await? {
                break account;
            }
            if self.repo.get_account_by_username(&username).await?.is_some() {
                return Err(AppError::AccountAlreadyExists(username));
            }
            if self.repo.get_account_by_email(&email).await?.is_some() {
                return Err(AppError::AccountAlreadyExists(email));
            }
            debug!(username = %username, code = %account.referral_code, "referral code taken, retrying");
        };

        info!(
            username = %account.username,
            referred_by = referrer.as_ref().map(|r| r.username.as_str()),
            "account created"
        );
        Ok(account)
    }

    /// Get an account by username.
    pub async fn get_account(&self, username: &str) -> Result<Account, AppError> {
        self.repo
            .get_account_by_username(username)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(username.to_string()))
    }

    /// Get an account by ID.
    pub async fn get_account_by_id(&self, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    /// Get detailed account information.
    pub async fn get_account_info(&self, username: &str) -> Result<AccountInfo, AppError> {
        let account = self.get_account(username).await?;
        let referrer = match account.referred_by {
            Some(id) => self.repo.get_account(id).await?.map(|a| a.username),
            None => None,
        };
        let referred_count = self.repo.list_referred_accounts(account.id).await?.len();
        let transactions = self
            .repo
            .list_transactions_for_account(account.id, None, None)
            .await?;

        Ok(AccountInfo {
            referrer,
            referred_count,
            transaction_count: transactions.len(),
            last_activity: transactions.first().map(|t| t.timestamp),
            account,
        })
    }

    /// List all accounts.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    /// Get a map of account IDs to usernames (useful for display).
    pub async fn get_account_names(&self) -> Result<HashMap<AccountId, String>, AppError> {
        let accounts = self.repo.list_accounts().await?;
        Ok(accounts.into_iter().map(|a| (a.id, a.username)).collect())
    }

    // ========================
    // Deposits
    // ========================

    /// Credit a deposit immediately, with the lucky order commission when flagged.
    /// Not idempotent: submitting the same deposit twice credits it twice.
    pub async fn deposit(
        &self,
        username: &str,
        input: DepositInput,
    ) -> Result<DepositReceipt, AppError> {
        let mut account = self.get_account(username).await?;
        let outcome = compute_deposit_with_rate(
            account.balance,
            input.amount,
            input.is_lucky_order_commission,
            self.config.lucky_commission_rate,
        )?;

        account.balance = outcome.new_balance;
        if input.is_lucky_order_commission {
            account.lucky_order_count += 1;
            account.record_commission(outcome.commission, Utc::now().date_naive());
        }

        let description = if input.is_lucky_order_commission {
            "Lucky order deposit"
        } else {
            "Deposit"
        };
        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::Deposit,
            outcome.deposit_amount,
            outcome.commission,
            outcome.new_balance,
        )
        .with_description(description);

        self.commit(&mut account, &mut record, SideWrite::None)
            .await?;
        info!(
            username,
            amount = %outcome.deposit_amount,
            commission = %outcome.commission,
            new_balance = %outcome.new_balance,
            "deposit credited"
        );

        Ok(DepositReceipt {
            deposit_amount: outcome.deposit_amount,
            commission: outcome.commission,
            total_received: outcome.total_received,
            new_balance: outcome.new_balance,
            transaction: record,
        })
    }

    /// File a deposit for administrator review. The balance is untouched until approval.
    pub async fn request_deposit(
        &self,
        username: &str,
        amount: Amount,
        method: DepositMethod,
        address: String,
        notes: Option<String>,
    ) -> Result<DepositRequest, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        if address.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "deposit address is required".to_string(),
            ));
        }

        let account = self.get_account(username).await?;
        let mut request = DepositRequest::new(account.id, amount, method, address.trim());
        if let Some(notes) = notes {
            request = request.with_notes(notes);
        }

        self.repo.save_deposit_request(&request).await?;
        info!(username, amount = %amount, id = %request.id, "deposit requested");
        Ok(request)
    }

    /// List deposit requests, optionally for one account and/or status.
    pub async fn list_deposit_requests(
        &self,
        username: Option<&str>,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<DepositRequest>, AppError> {
        let account_id = match username {
            Some(name) => Some(self.get_account(name).await?.id),
            None => None,
        };
        Ok(self.repo.list_deposit_requests(account_id, status).await?)
    }

    /// Approve a pending deposit request and credit its amount.
    pub async fn approve_deposit_request(
        &self,
        id: DepositRequestId,
    ) -> Result<DepositReceipt, AppError> {
        let request = self.pending_deposit_request(id).await?;
        let mut account = self.get_account_by_id(request.account_id).await?;

        let outcome = compute_deposit_with_rate(
            account.balance,
            request.amount,
            false,
            self.config.lucky_commission_rate,
        )?;
        account.balance = outcome.new_balance;

        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::Deposit,
            outcome.deposit_amount,
            outcome.commission,
            outcome.new_balance,
        )
        .with_description(format!("Deposit via {}", request.method));

        self.commit(
            &mut account,
            &mut record,
            SideWrite::SettleDeposit(id, ReviewStatus::Approved, Utc::now()),
        )
        .await?;
        info!(id = %id, username = %account.username, amount = %request.amount, "deposit approved");

        Ok(DepositReceipt {
            deposit_amount: outcome.deposit_amount,
            commission: outcome.commission,
            total_received: outcome.total_received,
            new_balance: outcome.new_balance,
            transaction: record,
        })
    }

    /// Reject a pending deposit request. No money moves.
    pub async fn reject_deposit_request(
        &self,
        id: DepositRequestId,
    ) -> Result<DepositRequest, AppError> {
        let mut request = self.pending_deposit_request(id).await?;
        let now = Utc::now();

        let mut tx = self.repo.begin().await?;
        if !Repository::settle_deposit_request(&mut tx, id, ReviewStatus::Rejected, now).await? {
            return Err(self.deposit_not_pending(id).await);
        }
        tx.commit().await.context("Failed to commit rejection")?;

        request.status = ReviewStatus::Rejected;
        request.processed_at = Some(now);
        info!(id = %id, "deposit rejected");
        Ok(request)
    }

    async fn pending_deposit_request(
        &self,
        id: DepositRequestId,
    ) -> Result<DepositRequest, AppError> {
        let request = self
            .repo
            .get_deposit_request(id)
            .await?
            .ok_or_else(|| AppError::DepositRequestNotFound(id.to_string()))?;
        if !request.status.is_pending() {
            return Err(AppError::NotPending {
                kind: "Deposit request",
                id: id.to_string(),
                status: request.status,
            });
        }
        Ok(request)
    }

    async fn deposit_not_pending(&self, id: DepositRequestId) -> AppError {
        match self.repo.get_deposit_request(id).await {
            Ok(Some(request)) => AppError::NotPending {
                kind: "Deposit request",
                id: id.to_string(),
                status: request.status,
            },
            Ok(None) => AppError::DepositRequestNotFound(id.to_string()),
            Err(err) => AppError::Database(err),
        }
    }

    // ========================
    // Products and ratings
    // ========================

    /// Add a product to the end of the catalogue.
    pub async fn add_product(
        &self,
        name: String,
        price: Amount,
        category: String,
    ) -> Result<Product, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("product name is required".to_string()));
        }
        if price <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(
                "Product price must be positive".to_string(),
            ));
        }

        let product = Product::new(name.trim(), price, category.trim());
        self.repo.save_product(&product).await?;
        info!(product = %product.name, price = %price, "product added");
        Ok(product)
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Product, AppError> {
        self.repo
            .get_product(id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(id.to_string()))
    }

    /// List products in catalogue order.
    pub async fn list_products(&self, include_inactive: bool) -> Result<Vec<Product>, AppError> {
        Ok(self.repo.list_products(include_inactive).await?)
    }

    /// Remove a product from the active catalogue.
    pub async fn deactivate_product(&self, id: ProductId) -> Result<Product, AppError> {
        let mut product = self.get_product(id).await?;
        self.repo.set_product_active(id, false).await?;
        product.active = false;
        Ok(product)
    }

    /// Complete a rating task now.
    pub async fn rate_product(
        &self,
        username: &str,
        input: RatingInput,
    ) -> Result<RatingReceipt, AppError> {
        self.rate_product_at(username, input, Utc::now()).await
    }

    /// Complete a rating task as of `now`: spend the product price and credit
    /// the rating profit.
    pub async fn rate_product_at(
        &self,
        username: &str,
        input: RatingInput,
        now: DateTime<Utc>,
    ) -> Result<RatingReceipt, AppError> {
        if input.rating != REQUIRED_STARS {
            return Err(AppError::InvalidRating {
                given: input.rating,
                required: REQUIRED_STARS,
            });
        }

        let mut account = self.get_account(username).await?;
        let product = self.get_product(input.product_id).await?;
        if !product.active {
            return Err(AppError::ProductInactive(product.name));
        }

        let today = now.date_naive();
        let rated_today = self.repo.rated_products_on(account.id, today).await?;
        if rated_today.contains(&product.id) {
            return Err(AppError::AlreadyRatedToday {
                product: product.name,
                day: today,
            });
        }

        let catalogue = self.repo.list_products(false).await?;
        if let Some(blocking) = first_unrated_before(&catalogue, &rated_today, product.id) {
            debug!(username, product = %product.name, blocking = %blocking.name, "rating out of order");
            return Err(AppError::OutOfOrder {
                requested: product.name,
                blocking: blocking.name.clone(),
            });
        }

        let outcome =
            compute_rating_commission(account.balance, product.price, self.config.profit_rate)?;
        account.balance = outcome.new_balance;
        // Only the gain over the spent price counts as earned
        let net_gain = outcome.profit - product.price;
        if net_gain > Decimal::ZERO {
            account.record_earnings(net_gain, today);
        }

        let rating = Rating::new(account.id, &product, input.rating, outcome.profit, now);
        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::RatingCommission,
            product.price,
            outcome.profit,
            outcome.new_balance,
        )
        .with_description(format!("Rating task completed for {}", product.name));
        record.timestamp = now;

        self.commit(&mut account, &mut record, SideWrite::Rating(&rating))
            .await?;
        info!(
            username,
            product = %product.name,
            profit = %outcome.profit,
            new_balance = %outcome.new_balance,
            "product rated"
        );

        Ok(RatingReceipt {
            rating,
            product_name: product.name,
            new_balance: outcome.new_balance,
            profit: outcome.profit,
            transaction: record,
        })
    }

    /// Every rating, oldest first.
    pub async fn list_all_ratings(&self) -> Result<Vec<Rating>, AppError> {
        Ok(self.repo.list_ratings().await?)
    }

    /// Ratings completed by an account, newest first.
    pub async fn list_ratings(&self, username: &str) -> Result<Vec<Rating>, AppError> {
        let account = self.get_account(username).await?;
        Ok(self.repo.list_ratings_for_account(account.id).await?)
    }

    // ========================
    // Referrals
    // ========================

    /// Resolve a referral code to the account that owns it.
    pub async fn validate_referral_code(&self, code: &str) -> Result<Account, AppError> {
        self.repo
            .get_account_by_referral_code(code.trim())
            .await?
            .ok_or_else(|| AppError::InvalidReferralCode(code.to_string()))
    }

    /// Shareable signup link carrying the account's referral code.
    pub async fn referral_link(&self, username: &str) -> Result<String, AppError> {
        let account = self.get_account(username).await?;
        Ok(referral_link(
            &self.config.referral_link_base,
            &account.referral_code,
        ))
    }

    /// Pay `amount` to `referrer_name` for activity of an account it referred.
    pub async fn add_referral_commission(
        &self,
        referrer_name: &str,
        referred_name: &str,
        amount: Amount,
    ) -> Result<ReferralCommissionResult, AppError> {
        let mut referrer = self.get_account(referrer_name).await?;
        let referred = self.get_account(referred_name).await?;

        if !referred.was_referred_by(referrer.id) {
            return Err(AppError::InvalidReferralRelationship {
                referrer: referrer.username,
                referred: referred.username,
            });
        }

        let new_balance = compute_credit(referrer.balance, amount)?;
        referrer.balance = new_balance;
        referrer.record_commission(amount, Utc::now().date_naive());

        let mut record = TransactionRecord::new(
            referrer.id,
            TransactionKind::ReferralBonus,
            amount,
            amount,
            new_balance,
        )
        .with_counterparty(referred.id)
        .with_description(format!(
            "Referral commission from {}'s purchase",
            referred.username
        ));

        self.commit(&mut referrer, &mut record, SideWrite::None)
            .await?;
        info!(
            referrer = referrer_name,
            referred = referred_name,
            amount = %amount,
            "referral commission paid"
        );

        Ok(ReferralCommissionResult {
            commission_amount: amount,
            new_referrer_balance: new_balance,
            total_commission_earned: referrer.commission_earned,
            transaction: record,
        })
    }

    /// Direct referrals of an account with the commission each generated.
    pub async fn referral_stats(&self, username: &str) -> Result<ReferralStats, AppError> {
        let account = self.get_account(username).await?;
        let referred = self.repo.list_referred_accounts(account.id).await?;
        let bonuses = self
            .repo
            .list_transactions_for_account(account.id, Some(TransactionKind::ReferralBonus), None)
            .await?;

        let mut per_user: HashMap<AccountId, Amount> = HashMap::new();
        for bonus in &bonuses {
            if let Some(counterparty) = bonus.counterparty {
                *per_user.entry(counterparty).or_insert(Decimal::ZERO) += bonus.commission;
            }
        }
        let total_commissions: Amount = bonuses.iter().map(|b| b.commission).sum();

        let referred_users = referred
            .into_iter()
            .map(|user| ReferredUser {
                commission: per_user.get(&user.id).copied().unwrap_or(Decimal::ZERO),
                username: user.username,
                email: user.email,
                joined_at: user.created_at,
                balance: user.balance,
            })
            .collect::<Vec<_>>();

        Ok(ReferralStats {
            referral_link: referral_link(&self.config.referral_link_base, &account.referral_code),
            referral_code: account.referral_code,
            total_referred_users: referred_users.len(),
            total_commissions,
            user_balance: account.balance,
            user_commission_earned: account.commission_earned,
            referred_users,
        })
    }

    // ========================
    // Withdrawals
    // ========================

    /// Store where withdrawals of this account are paid out.
    pub async fn setup_withdrawal(
        &self,
        username: &str,
        method: WithdrawalMethod,
        address: String,
    ) -> Result<Account, AppError> {
        let address = address.trim().to_string();
        if address.is_empty() {
            return Err(AppError::InvalidInput(
                "withdrawal address is required".to_string(),
            ));
        }

        let mut account = self.get_account(username).await?;
        account.withdrawal_method = Some(method);
        account.withdrawal_address = Some(address);
        self.repo.update_withdrawal_info(&account).await?;
        info!(username, method = %method, "withdrawal info saved");
        Ok(account)
    }

    /// Debit a withdrawal and queue it for payout.
    pub async fn request_withdrawal(
        &self,
        username: &str,
        amount: Amount,
    ) -> Result<WithdrawalResult, AppError> {
        let mut account = self.get_account(username).await?;
        let (Some(method), Some(address)) =
            (account.withdrawal_method, account.withdrawal_address.clone())
        else {
            return Err(AppError::WithdrawalNotConfigured(account.username));
        };

        let new_balance =
            compute_withdrawal(account.balance, amount, self.config.min_withdrawal)?;
        account.balance = new_balance;

        let withdrawal = Withdrawal::new(
            account.id,
            amount,
            self.config.withdrawal_fee,
            method,
            address,
        );
        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::Withdrawal,
            amount,
            Decimal::ZERO,
            new_balance,
        )
        .with_description(format!("Withdrawal via {}", method));

        self.commit(
            &mut account,
            &mut record,
            SideWrite::NewWithdrawal(&withdrawal),
        )
        .await?;
        info!(username, amount = %amount, id = %withdrawal.id, "withdrawal requested");

        Ok(WithdrawalResult {
            withdrawal,
            new_balance,
            transaction: Some(record),
        })
    }

    /// List withdrawals, optionally for one account and/or status.
    pub async fn list_withdrawals(
        &self,
        username: Option<&str>,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<Withdrawal>, AppError> {
        let account_id = match username {
            Some(name) => Some(self.get_account(name).await?.id),
            None => None,
        };
        Ok(self.repo.list_withdrawals(account_id, status).await?)
    }

    /// Mark a pending withdrawal as paid out. The balance was debited on request.
    pub async fn approve_withdrawal(&self, id: WithdrawalId) -> Result<WithdrawalResult, AppError> {
        let mut withdrawal = self.pending_withdrawal(id).await?;
        let account = self.get_account_by_id(withdrawal.account_id).await?;
        let now = Utc::now();

        let mut tx = self.repo.begin().await?;
        if !Repository::settle_withdrawal(&mut tx, id, ReviewStatus::Approved, now).await? {
            return Err(self.withdrawal_not_pending(id).await);
        }
        tx.commit().await.context("Failed to commit approval")?;

        withdrawal.status = ReviewStatus::Approved;
        withdrawal.processed_at = Some(now);
        info!(id = %id, "withdrawal approved");
        Ok(WithdrawalResult {
            withdrawal,
            new_balance: account.balance,
            transaction: None,
        })
    }

    /// Reject a pending withdrawal and refund its amount.
    pub async fn reject_withdrawal(&self, id: WithdrawalId) -> Result<WithdrawalResult, AppError> {
        let mut withdrawal = self.pending_withdrawal(id).await?;
        let mut account = self.get_account_by_id(withdrawal.account_id).await?;
        let now = Utc::now();

        let new_balance = compute_credit(account.balance, withdrawal.amount)?;
        account.balance = new_balance;

        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::WithdrawalRefund,
            withdrawal.amount,
            Decimal::ZERO,
            new_balance,
        )
        .with_description("Withdrawal rejected, amount refunded");

        self.commit(
            &mut account,
            &mut record,
            SideWrite::SettleWithdrawal(id, ReviewStatus::Rejected, now),
        )
        .await?;

        withdrawal.status = ReviewStatus::Rejected;
        withdrawal.processed_at = Some(now);
        info!(id = %id, amount = %withdrawal.amount, "withdrawal rejected and refunded");
        Ok(WithdrawalResult {
            withdrawal,
            new_balance,
            transaction: Some(record),
        })
    }

    async fn pending_withdrawal(&self, id: WithdrawalId) -> Result<Withdrawal, AppError> {
        let withdrawal = self
            .repo
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| AppError::WithdrawalNotFound(id.to_string()))?;
        if !withdrawal.status.is_pending() {
            return Err(AppError::NotPending {
                kind: "Withdrawal",
                id: id.to_string(),
                status: withdrawal.status,
            });
        }
        Ok(withdrawal)
    }

    async fn withdrawal_not_pending(&self, id: WithdrawalId) -> AppError {
        match self.repo.get_withdrawal(id).await {
            Ok(Some(withdrawal)) => AppError::NotPending {
                kind: "Withdrawal",
                id: id.to_string(),
                status: withdrawal.status,
            },
            Ok(None) => AppError::WithdrawalNotFound(id.to_string()),
            Err(err) => AppError::Database(err),
        }
    }

    // ========================
    // Vouchers
    // ========================

    /// Set `amount` of the balance aside under a new voucher code.
    pub async fn generate_voucher(
        &self,
        username: &str,
        amount: Amount,
    ) -> Result<VoucherReceipt, AppError> {
        self.generate_voucher_at(username, amount, Utc::now()).await
    }

    /// Same as [`LedgerService::generate_voucher`] as of `now`; the voucher
    /// expires after the configured number of days.
    pub async fn generate_voucher_at(
        &self,
        username: &str,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<VoucherReceipt, AppError> {
        let mut account = self.get_account(username).await?;
        let new_balance = compute_debit(account.balance, amount)?;
        account.balance = new_balance;

        let voucher = Voucher::new(account.id, amount, now, self.config.voucher_validity_days);
        let mut record = TransactionRecord::new(
            account.id,
            TransactionKind::VoucherGeneration,
            amount,
            Decimal::ZERO,
            new_balance,
        )
        .with_description(format!("Voucher generation: {}", voucher.code));
        record.timestamp = now;

        self.commit(&mut account, &mut record, SideWrite::NewVoucher(&voucher))
            .await?;
        info!(username, amount = %amount, code = %voucher.code, "voucher generated");

        Ok(VoucherReceipt {
            voucher,
            new_balance,
            transaction: record,
        })
    }

    /// Redeem a voucher code now.
    pub async fn redeem_voucher(
        &self,
        redeemer: &str,
        code: &str,
    ) -> Result<VoucherRedemption, AppError> {
        self.redeem_voucher_at(redeemer, code, Utc::now()).await
    }

    /// Redeem a voucher as of `now`. Anyone may redeem an active code; its
    /// amount goes back to the owner. A code past its expiry is marked
    /// expired and refused.
    pub async fn redeem_voucher_at(
        &self,
        redeemer: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VoucherRedemption, AppError> {
        let code = normalize_voucher_code(code);
        if code.is_empty() {
            return Err(AppError::InvalidInput("voucher code is required".to_string()));
        }

        let mut voucher = self
            .repo
            .get_voucher_by_code(&code)
            .await?
            .ok_or_else(|| AppError::VoucherNotFound(code.clone()))?;
        if !voucher.status.is_active() {
            return Err(AppError::VoucherUnavailable {
                code,
                status: voucher.status,
            });
        }
        if voucher.is_expired_at(now) {
            if !self.repo.expire_voucher(voucher.id).await? {
                return Err(self.voucher_not_active(&code).await);
            }
            warn!(code = %code, expires_at = %voucher.expires_at, "voucher expired");
            return Err(AppError::VoucherExpired(code));
        }

        let redeemer = self.get_account(redeemer).await?;
        let mut owner = self.get_account_by_id(voucher.owner_id).await?;
        let new_balance = compute_credit(owner.balance, voucher.amount)?;
        owner.balance = new_balance;

        let mut record = TransactionRecord::new(
            owner.id,
            TransactionKind::VoucherRedemption,
            voucher.amount,
            Decimal::ZERO,
            new_balance,
        )
        .with_counterparty(redeemer.id)
        .with_description(format!(
            "Voucher redemption: {} by {}",
            voucher.code, redeemer.username
        ));
        record.timestamp = now;

        self.commit(
            &mut owner,
            &mut record,
            SideWrite::RedeemVoucher(&voucher, redeemer.id, now),
        )
        .await?;

        voucher.status = VoucherStatus::Used;
        voucher.redeemed_by = Some(redeemer.id);
        voucher.used_at = Some(now);
        info!(
            code = %voucher.code,
            owner = %owner.username,
            redeemer = %redeemer.username,
            amount = %voucher.amount,
            "voucher redeemed"
        );

        Ok(VoucherRedemption {
            voucher,
            owner: owner.username,
            owner_new_balance: new_balance,
            transaction: record,
        })
    }

    /// List vouchers, optionally for one owner and/or status.
    pub async fn list_vouchers(
        &self,
        username: Option<&str>,
        status: Option<VoucherStatus>,
    ) -> Result<Vec<Voucher>, AppError> {
        let owner_id = match username {
            Some(name) => Some(self.get_account(name).await?.id),
            None => None,
        };
        Ok(self.repo.list_vouchers(owner_id, status).await?)
    }

    async fn voucher_not_active(&self, code: &str) -> AppError {
        match self.repo.get_voucher_by_code(code).await {
            Ok(Some(voucher)) => AppError::VoucherUnavailable {
                code: code.to_string(),
                status: voucher.status,
            },
            Ok(None) => AppError::VoucherNotFound(code.to_string()),
            Err(err) => AppError::Database(err),
        }
    }

    // ========================
    // Transaction history
    // ========================

    /// Transactions of one account, most recent first.
    pub async fn list_transactions(
        &self,
        username: &str,
        kind: Option<TransactionKind>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let account = self.get_account(username).await?;
        Ok(self
            .repo
            .list_transactions_for_account(account.id, kind, limit)
            .await?)
    }

    /// The whole transaction log in sequence order.
    pub async fn list_all_transactions(&self) -> Result<Vec<TransactionRecord>, AppError> {
        Ok(self.repo.list_transactions().await?)
    }

    // ========================
    // Chat
    // ========================

    /// Conversation id of the support thread of an account.
    pub async fn support_conversation(&self, username: &str) -> Result<String, AppError> {
        let account = self.get_account(username).await?;
        Ok(support_conversation_id(account.id))
    }

    /// Persist a chat message. Delivery is up to the reader.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender: &str,
        sender_type: SenderType,
        body: String,
        attachment: Option<(MessageType, MediaAttachment)>,
    ) -> Result<ChatMessage, AppError> {
        if body.trim().is_empty() {
            return Err(AppError::InvalidInput("message body is required".to_string()));
        }

        let sender = self.get_account(sender).await?;
        let mut message = ChatMessage::new(conversation_id, sender.id, sender_type, body);
        if let Some((message_type, media)) = attachment {
            message = message.with_media(message_type, media);
        }

        self.repo.save_chat_message(&message).await?;
        debug!(conversation = conversation_id, sender = %sender.username, "chat message stored");
        Ok(message)
    }

    /// Messages of a conversation, oldest first.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        Ok(self.repo.list_conversation(conversation_id).await?)
    }

    /// Every stored chat message, oldest first.
    pub async fn list_all_messages(&self) -> Result<Vec<ChatMessage>, AppError> {
        Ok(self.repo.list_chat_messages().await?)
    }

    /// Mark a message read. Reading an already-read message keeps its first read time.
    pub async fn mark_message_read(&self, id: ChatMessageId) -> Result<ChatMessage, AppError> {
        let mut message = self
            .repo
            .get_chat_message(id)
            .await?
            .ok_or_else(|| AppError::ChatMessageNotFound(id.to_string()))?;

        let now = Utc::now();
        if message.mark_read(now) && !self.repo.mark_chat_message_read(id, now).await? {
            // Read concurrently; report the stored read time.
            return self
                .repo
                .get_chat_message(id)
                .await?
                .ok_or_else(|| AppError::ChatMessageNotFound(id.to_string()));
        }
        Ok(message)
    }

    /// Unread messages in a conversation sent by `from`.
    pub async fn unread_count(
        &self,
        conversation_id: &str,
        from: SenderType,
    ) -> Result<i64, AppError> {
        Ok(self.repo.count_unread(conversation_id, from).await?)
    }

    // ========================
    // Integrity
    // ========================

    /// Replay the transaction log against stored balances.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let transactions = self.repo.list_transactions().await?;
        Ok(build_integrity_report(&accounts, &transactions))
    }

    // ========================
    // Balance writes
    // ========================

    /// Persist the new account state, its transaction record and any side row
    /// atomically. Fails with `ConcurrentUpdate` if the account changed since
    /// it was read; nothing is written in that case.
    async fn commit(
        &self,
        account: &mut Account,
        record: &mut TransactionRecord,
        side: SideWrite<'_>,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;

        if !Repository::update_account_state(&mut tx, account).await? {
            warn!(username = %account.username, version = account.version, "stale account version");
            return Err(AppError::ConcurrentUpdate(account.username.clone()));
        }

        Repository::insert_transaction(&mut tx, record).await?;

        match side {
            SideWrite::None => {}
            SideWrite::Rating(rating) => Repository::insert_rating(&mut tx, rating).await?,
            SideWrite::NewWithdrawal(withdrawal) => {
                Repository::insert_withdrawal(&mut tx, withdrawal).await?
            }
            SideWrite::SettleDeposit(id, status, at) => {
                if !Repository::settle_deposit_request(&mut tx, id, status, at).await? {
                    drop(tx);
                    return Err(self.deposit_not_pending(id).await);
                }
            }
            SideWrite::SettleWithdrawal(id, status, at) => {
                if !Repository::settle_withdrawal(&mut tx, id, status, at).await? {
                    drop(tx);
                    return Err(self.withdrawal_not_pending(id).await);
                }
            }
            SideWrite::NewVoucher(voucher) => Repository::insert_voucher(&mut tx, voucher).await?,
            SideWrite::RedeemVoucher(voucher, redeemer, at) => {
                if !Repository::redeem_voucher(&mut tx, voucher.id, redeemer, at).await? {
                    drop(tx);
                    return Err(self.voucher_not_active(&voucher.code).await);
                }
            }
        }

        tx.commit().await.context("Failed to commit balance change")?;
        debug!(
            username = %account.username,
            sequence = record.sequence,
            kind = %record.kind,
            "balance change committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use super::*;

    async fn service_with_account(username: &str) -> anyhow::Result<(LedgerService, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");
        let path = db_path.to_str().expect("utf-8 temp path");
        let service = LedgerService::init(path, LedgerConfig::default()).await?;
        service
            .create_account(username.into(), format!("{username}@example.com"), None)
            .await?;
        Ok((service, temp_dir))
    }

    #[tokio::test]
    async fn test_commit_with_stale_account_is_refused() -> anyhow::Result<()> {
        let (service, _temp) = service_with_account("alice").await?;

        // Read, then let another request move the balance first
        let mut stale = service.get_account("alice").await?;
        let input = DepositInput {
            amount: dec!(10),
            is_lucky_order_commission: false,
        };
        service.deposit("alice", input).await?;

        stale.balance = dec!(99);
        let mut record = TransactionRecord::new(
            stale.id,
            TransactionKind::Deposit,
            dec!(99),
            Decimal::ZERO,
            dec!(99),
        );
        let result = service.commit(&mut stale, &mut record, SideWrite::None).await;
        assert!(matches!(result, Err(AppError::ConcurrentUpdate(ref name)) if name == "alice"));
        assert_eq!(stale.version, 0);

        let stored = service.get_account("alice").await?;
        assert_eq!(stored.balance, dec!(10));
        assert_eq!(stored.version, 1);
        assert_eq!(service.list_all_transactions().await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_stale_commit_drops_its_side_row() -> anyhow::Result<()> {
        let (service, _temp) = service_with_account("bob").await?;
        let product = service
            .add_product("Lamp".into(), dec!(10), "home".into())
            .await?;
        let funding = DepositInput {
            amount: dec!(50),
            is_lucky_order_commission: false,
        };
        service.deposit("bob", funding).await?;

        let mut stale = service.get_account("bob").await?;
        service.deposit("bob", funding).await?;

        let now = Utc::now();
        let rating = Rating::new(stale.id, &product, REQUIRED_STARS, dec!(10.5), now);
        stale.balance = dec!(50.5);
        let mut record = TransactionRecord::new(
            stale.id,
            TransactionKind::RatingCommission,
            dec!(10),
            dec!(10.5),
            dec!(50.5),
        );
        let result = service
            .commit(&mut stale, &mut record, SideWrite::Rating(&rating))
            .await;
        assert!(matches!(result, Err(AppError::ConcurrentUpdate(_))));

        assert!(service.list_ratings("bob").await?.is_empty());
        assert_eq!(service.get_account("bob").await?.balance, dec!(100));
        let report = service.check_integrity().await?;
        assert!(report.is_ok(), "{:?}", report.issues);

        Ok(())
    }
}
