use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, ChatMessage, ChatMessageId, DepositRequest, DepositRequestId,
    MediaAttachment, Product, ProductId, Rating, ReviewStatus, SenderType, TransactionKind,
    TransactionRecord, Voucher, VoucherId, VoucherStatus, Withdrawal, WithdrawalId,
};

use super::{
    MIGRATION_001_INITIAL, MIGRATION_002_TASKS, MIGRATION_003_FUNDING, MIGRATION_004_CHAT,
    MIGRATION_005_VOUCHERS,
};

const ACCOUNT_COLUMNS: &str = "id, username, email, balance, total_earnings_today, commission_earned, lucky_order_count, referral_code, referred_by, withdrawal_method, withdrawal_address, last_daily_reset, version, created_at";

const TRANSACTION_COLUMNS: &str = "id, sequence, account_id, kind, amount, commission, resulting_balance, counterparty, description, timestamp";

const PRODUCT_COLUMNS: &str = "id, name, price, category, active, created_at";

const RATING_COLUMNS: &str =
    "id, account_id, product_id, stars, product_price, profit, rated_on, created_at";

const DEPOSIT_REQUEST_COLUMNS: &str =
    "id, account_id, amount, method, address, notes, status, created_at, processed_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, account_id, amount, fee, method, address, status, created_at, processed_at";

const CHAT_COLUMNS: &str = "id, conversation_id, sender_id, sender_type, body, message_type, media_url, media_name, media_size, read_at, created_at";

const VOUCHER_COLUMNS: &str =
    "id, code, account_id, amount, status, expires_at, redeemed_by, used_at, created_at";

/// Repository for persisting and querying accounts, the transaction log and
/// the records that hang off them.
///
/// Balance writes go through [`Repository::update_account_state`] on a
/// connection borrowed from a transaction started with [`Repository::begin`],
/// so the balance and its transaction record commit together.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        for (name, sql) in [
            ("001", MIGRATION_001_INITIAL),
            ("002", MIGRATION_002_TASKS),
            ("003", MIGRATION_003_FUNDING),
            ("004", MIGRATION_004_CHAT),
            ("005", MIGRATION_005_VOUCHERS),
        ] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run migration {}", name))?;
        }
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a database transaction for a multi-row write.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account. Returns false when its username, email or
    /// referral code is already taken.
    pub async fn save_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(&account.email)
        .bind(account.balance.to_string())
        .bind(account.total_earnings_today.to_string())
        .bind(account.commission_earned.to_string())
        .bind(account.lucky_order_count)
        .bind(&account.referral_code)
        .bind(account.referred_by.map(|id| id.to_string()))
        .bind(account.withdrawal_method.map(|m| m.as_str()))
        .bind(&account.withdrawal_address)
        .bind(account.last_daily_reset.map(|d| d.to_string()))
        .bind(account.version)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
            Err(err) => Err(err).context("Failed to save account"),
        }
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.fetch_account_where("id", &id.to_string()).await
    }

    /// Get an account by username.
    pub async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.fetch_account_where("username", username).await
    }

    /// Get an account by email (stored lower-cased).
    pub async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.fetch_account_where("email", &email.trim().to_lowercase())
            .await
    }

    /// Get the account owning a referral code.
    pub async fn get_account_by_referral_code(&self, code: &str) -> Result<Option<Account>> {
        self.fetch_account_where("referral_code", code).await
    }

    async fn fetch_account_where(&self, column: &str, value: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch account by {}", column))?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List all accounts ordered by username.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY username"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Accounts that signed up with the given referrer's code, newest first.
    pub async fn list_referred_accounts(&self, referrer: AccountId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE referred_by = ? ORDER BY created_at DESC"
        ))
        .bind(referrer.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list referred accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Store payout details. Does not touch the balance.
    pub async fn update_withdrawal_info(&self, account: &Account) -> Result<()> {
        sqlx::query("UPDATE accounts SET withdrawal_method = ?, withdrawal_address = ? WHERE id = ?")
            .bind(account.withdrawal_method.map(|m| m.as_str()))
            .bind(&account.withdrawal_address)
            .bind(account.id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update withdrawal info")?;
        Ok(())
    }

    /// Write the money fields of `account` if nobody else wrote it since it
    /// was read. Compares against `account.version` and bumps it on success.
    /// Returns false when the stored version has moved on.
    pub async fn update_account_state(
        conn: &mut SqliteConnection,
        account: &mut Account,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?, total_earnings_today = ?, commission_earned = ?,
                lucky_order_count = ?, last_daily_reset = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(account.balance.to_string())
        .bind(account.total_earnings_today.to_string())
        .bind(account.commission_earned.to_string())
        .bind(account.lucky_order_count)
        .bind(account.last_daily_reset.map(|d| d.to_string()))
        .bind(account.id.to_string())
        .bind(account.version)
        .execute(&mut *conn)
        .await
        .context("Failed to update account balance")?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }
        account.version += 1;
        Ok(true)
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let withdrawal_method: Option<String> = row.get("withdrawal_method");
        let last_daily_reset: Option<String> = row.get("last_daily_reset");

        Ok(Account {
            id: parse_uuid(row, "id")?,
            username: row.get("username"),
            email: row.get("email"),
            balance: parse_decimal(row, "balance")?,
            total_earnings_today: parse_decimal(row, "total_earnings_today")?,
            commission_earned: parse_decimal(row, "commission_earned")?,
            lucky_order_count: row.get("lucky_order_count"),
            referral_code: row.get("referral_code"),
            referred_by: parse_optional_uuid(row, "referred_by")?,
            withdrawal_method: withdrawal_method
                .map(|s| s.parse())
                .transpose()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            withdrawal_address: row.get("withdrawal_address"),
            last_daily_reset: last_daily_reset
                .map(|s| NaiveDate::from_str(&s))
                .transpose()
                .context("Invalid last_daily_reset date")?,
            version: row.get("version"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ========================
    // Transaction log
    // ========================

    /// Append a transaction record. Assigns the next sequence number.
    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        record: &mut TransactionRecord,
    ) -> Result<()> {
        record.sequence = Self::next_sequence(conn).await?;

        sqlx::query(&format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.id.to_string())
        .bind(record.sequence)
        .bind(record.account_id.to_string())
        .bind(record.kind.as_str())
        .bind(record.amount.to_string())
        .bind(record.commission.to_string())
        .bind(record.resulting_balance.to_string())
        .bind(record.counterparty.map(|id| id.to_string()))
        .bind(&record.description)
        .bind(record.timestamp.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    /// List every transaction, ordered by sequence number.
    pub async fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY sequence"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Transactions of one account, most recent first.
    pub async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
        kind: Option<TransactionKind>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>> {
        let mut query = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?");
        if kind.is_some() {
            query.push_str(" AND kind = ?");
        }
        query.push_str(" ORDER BY sequence DESC");
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query).bind(account_id.to_string());
        if let Some(kind) = kind {
            sql_query = sql_query.bind(kind.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<TransactionRecord> {
        let kind: String = row.get("kind");

        Ok(TransactionRecord {
            id: parse_uuid(row, "id")?,
            sequence: row.get("sequence"),
            account_id: parse_uuid(row, "account_id")?,
            kind: kind.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            amount: parse_decimal(row, "amount")?,
            commission: parse_decimal(row, "commission")?,
            resulting_balance: parse_decimal(row, "resulting_balance")?,
            counterparty: parse_optional_uuid(row, "counterparty")?,
            description: row.get("description"),
            timestamp: parse_timestamp(row, "timestamp")?,
        })
    }

    // ========================
    // Products and ratings
    // ========================

    pub async fn save_product(&self, product: &Product) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO products ({PRODUCT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(product.id.to_string())
        .bind(&product.name)
        .bind(product.price.to_string())
        .bind(&product.category)
        .bind(product.active)
        .bind(product.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save product")?;
        Ok(())
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch product")?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    /// Products in catalogue order (creation order).
    pub async fn list_products(&self, include_inactive: bool) -> Result<Vec<Product>> {
        let filter = if include_inactive { "" } else { "WHERE active = 1" };
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products {filter} ORDER BY created_at, rowid"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list products")?;

        rows.iter().map(Self::row_to_product).collect()
    }

    pub async fn set_product_active(&self, id: ProductId, active: bool) -> Result<()> {
        sqlx::query("UPDATE products SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update product")?;
        Ok(())
    }

    fn row_to_product(row: &SqliteRow) -> Result<Product> {
        Ok(Product {
            id: parse_uuid(row, "id")?,
            name: row.get("name"),
            price: parse_decimal(row, "price")?,
            category: row.get("category"),
            active: row.get::<i32, _>("active") != 0,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    pub async fn insert_rating(conn: &mut SqliteConnection, rating: &Rating) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO ratings ({RATING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(rating.id.to_string())
        .bind(rating.account_id.to_string())
        .bind(rating.product_id.to_string())
        .bind(i64::from(rating.stars))
        .bind(rating.product_price.to_string())
        .bind(rating.profit.to_string())
        .bind(rating.rated_on.to_string())
        .bind(rating.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save rating")?;
        Ok(())
    }

    /// Products the account has rated on the given UTC day.
    pub async fn rated_products_on(
        &self,
        account_id: AccountId,
        day: NaiveDate,
    ) -> Result<HashSet<ProductId>> {
        let rows = sqlx::query("SELECT product_id FROM ratings WHERE account_id = ? AND rated_on = ?")
            .bind(account_id.to_string())
            .bind(day.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch rated products")?;

        rows.iter().map(|row| parse_uuid(row, "product_id")).collect()
    }

    pub async fn list_ratings_for_account(&self, account_id: AccountId) -> Result<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            "SELECT {RATING_COLUMNS} FROM ratings WHERE account_id = ? ORDER BY created_at DESC"
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ratings")?;

        rows.iter().map(Self::row_to_rating).collect()
    }

    /// Every rating, oldest first.
    pub async fn list_ratings(&self) -> Result<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            "SELECT {RATING_COLUMNS} FROM ratings ORDER BY created_at, rowid"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ratings")?;

        rows.iter().map(Self::row_to_rating).collect()
    }

    fn row_to_rating(row: &SqliteRow) -> Result<Rating> {
        let rated_on: String = row.get("rated_on");
        let stars: i64 = row.get("stars");

        Ok(Rating {
            id: parse_uuid(row, "id")?,
            account_id: parse_uuid(row, "account_id")?,
            product_id: parse_uuid(row, "product_id")?,
            stars: u8::try_from(stars).context("Invalid star count")?,
            product_price: parse_decimal(row, "product_price")?,
            profit: parse_decimal(row, "profit")?,
            rated_on: NaiveDate::from_str(&rated_on).context("Invalid rated_on date")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ========================
    // Deposit requests
    // ========================

    pub async fn save_deposit_request(&self, request: &DepositRequest) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO deposit_requests ({DEPOSIT_REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(request.id.to_string())
        .bind(request.account_id.to_string())
        .bind(request.amount.to_string())
        .bind(request.method.as_str())
        .bind(&request.address)
        .bind(&request.notes)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.processed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("Failed to save deposit request")?;
        Ok(())
    }

    pub async fn get_deposit_request(&self, id: DepositRequestId) -> Result<Option<DepositRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPOSIT_REQUEST_COLUMNS} FROM deposit_requests WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch deposit request")?;

        row.as_ref().map(Self::row_to_deposit_request).transpose()
    }

    /// Deposit requests, newest first, optionally filtered.
    pub async fn list_deposit_requests(
        &self,
        account_id: Option<AccountId>,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<DepositRequest>> {
        let rows = self
            .fetch_filtered(
                "deposit_requests",
                DEPOSIT_REQUEST_COLUMNS,
                account_id,
                status.map(|s| s.as_str()),
            )
            .await
            .context("Failed to list deposit requests")?;

        rows.iter().map(Self::row_to_deposit_request).collect()
    }

    /// Move a pending deposit request to `status`. Returns false if it was no longer pending.
    pub async fn settle_deposit_request(
        conn: &mut SqliteConnection,
        id: DepositRequestId,
        status: ReviewStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        Self::settle("deposit_requests", conn, id, status, processed_at)
            .await
            .context("Failed to update deposit request")
    }

    fn row_to_deposit_request(row: &SqliteRow) -> Result<DepositRequest> {
        let method: String = row.get("method");
        let status: String = row.get("status");

        Ok(DepositRequest {
            id: parse_uuid(row, "id")?,
            account_id: parse_uuid(row, "account_id")?,
            amount: parse_decimal(row, "amount")?,
            method: method.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            address: row.get("address"),
            notes: row.get("notes"),
            status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            created_at: parse_timestamp(row, "created_at")?,
            processed_at: parse_optional_timestamp(row, "processed_at")?,
        })
    }

    // ========================
    // Withdrawals
    // ========================

    pub async fn insert_withdrawal(conn: &mut SqliteConnection, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO withdrawals ({WITHDRAWAL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(withdrawal.id.to_string())
        .bind(withdrawal.account_id.to_string())
        .bind(withdrawal.amount.to_string())
        .bind(withdrawal.fee.to_string())
        .bind(withdrawal.method.as_str())
        .bind(&withdrawal.address)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.created_at.to_rfc3339())
        .bind(withdrawal.processed_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *conn)
        .await
        .context("Failed to save withdrawal")?;
        Ok(())
    }

    pub async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        let row = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch withdrawal")?;

        row.as_ref().map(Self::row_to_withdrawal).transpose()
    }

    /// Withdrawals, newest first, optionally filtered.
    pub async fn list_withdrawals(
        &self,
        account_id: Option<AccountId>,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<Withdrawal>> {
        let rows = self
            .fetch_filtered("withdrawals", WITHDRAWAL_COLUMNS, account_id, status.map(|s| s.as_str()))
            .await
            .context("Failed to list withdrawals")?;

        rows.iter().map(Self::row_to_withdrawal).collect()
    }

    /// Move a pending withdrawal to `status`. Returns false if it was no longer pending.
    pub async fn settle_withdrawal(
        conn: &mut SqliteConnection,
        id: WithdrawalId,
        status: ReviewStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        Self::settle("withdrawals", conn, id, status, processed_at)
            .await
            .context("Failed to update withdrawal")
    }

    fn row_to_withdrawal(row: &SqliteRow) -> Result<Withdrawal> {
        let method: String = row.get("method");
        let status: String = row.get("status");

        Ok(Withdrawal {
            id: parse_uuid(row, "id")?,
            account_id: parse_uuid(row, "account_id")?,
            amount: parse_decimal(row, "amount")?,
            fee: parse_decimal(row, "fee")?,
            method: method.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            address: row.get("address"),
            status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            created_at: parse_timestamp(row, "created_at")?,
            processed_at: parse_optional_timestamp(row, "processed_at")?,
        })
    }

    /// Rows of `table`, newest first, optionally narrowed to one account and status.
    async fn fetch_filtered(
        &self,
        table: &str,
        columns: &str,
        account_id: Option<AccountId>,
        status: Option<&'static str>,
    ) -> Result<Vec<SqliteRow>> {
        let mut query = format!("SELECT {columns} FROM {table} WHERE 1=1");
        let account_id_str = account_id.map(|id| id.to_string());

        if account_id.is_some() {
            query.push_str(" AND account_id = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut sql_query = sqlx::query(&query);
        if let Some(ref id) = account_id_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(status) = status {
            sql_query = sql_query.bind(status);
        }

        Ok(sql_query.fetch_all(&self.pool).await?)
    }

    async fn settle(
        table: &str,
        conn: &mut SqliteConnection,
        id: Uuid,
        status: ReviewStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {table} SET status = ?, processed_at = ? WHERE id = ? AND status = 'pending'"
        ))
        .bind(status.as_str())
        .bind(processed_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========================
    // Vouchers
    // ========================

    pub async fn insert_voucher(conn: &mut SqliteConnection, voucher: &Voucher) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO vouchers ({VOUCHER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(voucher.id.to_string())
        .bind(&voucher.code)
        .bind(voucher.owner_id.to_string())
        .bind(voucher.amount.to_string())
        .bind(voucher.status.as_str())
        .bind(voucher.expires_at.to_rfc3339())
        .bind(voucher.redeemed_by.map(|id| id.to_string()))
        .bind(voucher.used_at.map(|dt| dt.to_rfc3339()))
        .bind(voucher.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save voucher")?;
        Ok(())
    }

    /// Look a voucher up by its (normalized) code.
    pub async fn get_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>> {
        let row = sqlx::query(&format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE code = ?"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch voucher")?;

        row.as_ref().map(Self::row_to_voucher).transpose()
    }

    /// Vouchers, newest first, optionally filtered by owner and status.
    pub async fn list_vouchers(
        &self,
        owner_id: Option<AccountId>,
        status: Option<VoucherStatus>,
    ) -> Result<Vec<Voucher>> {
        let rows = self
            .fetch_filtered("vouchers", VOUCHER_COLUMNS, owner_id, status.map(|s| s.as_str()))
            .await
            .context("Failed to list vouchers")?;

        rows.iter().map(Self::row_to_voucher).collect()
    }

    /// Mark an active voucher used by `redeemer`. Returns false if it was no longer active.
    pub async fn redeem_voucher(
        conn: &mut SqliteConnection,
        id: VoucherId,
        redeemer: AccountId,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE vouchers SET status = 'used', redeemed_by = ?, used_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(redeemer.to_string())
        .bind(used_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to redeem voucher")?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark an active voucher expired. Returns false if it was no longer active.
    pub async fn expire_voucher(&self, id: VoucherId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE vouchers SET status = 'expired' WHERE id = ? AND status = 'active'")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .context("Failed to expire voucher")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_voucher(row: &SqliteRow) -> Result<Voucher> {
        let status: String = row.get("status");

        Ok(Voucher {
            id: parse_uuid(row, "id")?,
            code: row.get("code"),
            owner_id: parse_uuid(row, "account_id")?,
            amount: parse_decimal(row, "amount")?,
            status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            expires_at: parse_timestamp(row, "expires_at")?,
            redeemed_by: parse_optional_uuid(row, "redeemed_by")?,
            used_at: parse_optional_timestamp(row, "used_at")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ========================
    // Chat
    // ========================

    pub async fn save_chat_message(&self, message: &ChatMessage) -> Result<()> {
        let media = message.media.as_ref();
        sqlx::query(&format!(
            "INSERT INTO chat_messages ({CHAT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(message.id.to_string())
        .bind(&message.conversation_id)
        .bind(message.sender_id.to_string())
        .bind(message.sender_type.as_str())
        .bind(&message.body)
        .bind(message.message_type.as_str())
        .bind(media.map(|m| m.url.clone()))
        .bind(media.and_then(|m| m.name.clone()))
        .bind(media.and_then(|m| m.size))
        .bind(message.read_at.map(|dt| dt.to_rfc3339()))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save chat message")?;
        Ok(())
    }

    pub async fn get_chat_message(&self, id: ChatMessageId) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chat_messages WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch chat message")?;

        row.as_ref().map(Self::row_to_chat_message).transpose()
    }

    /// Messages of a conversation, oldest first.
    pub async fn list_conversation(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chat_messages WHERE conversation_id = ? ORDER BY created_at, rowid"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list conversation")?;

        rows.iter().map(Self::row_to_chat_message).collect()
    }

    /// Every chat message across conversations, oldest first.
    pub async fn list_chat_messages(&self) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chat_messages ORDER BY created_at, rowid"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list chat messages")?;

        rows.iter().map(Self::row_to_chat_message).collect()
    }

    /// Set `read_at` on an unread message. Returns false if it was already read.
    pub async fn mark_chat_message_read(&self, id: ChatMessageId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_messages SET read_at = ? WHERE id = ? AND read_at IS NULL")
            .bind(at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to mark chat message read")?;

        Ok(result.rows_affected() == 1)
    }

    /// Unread messages in a conversation sent by `sender_type`.
    pub async fn count_unread(&self, conversation_id: &str, sender_type: SenderType) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM chat_messages WHERE conversation_id = ? AND sender_type = ? AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(sender_type.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count unread messages")?;

        Ok(row.get("count"))
    }

    fn row_to_chat_message(row: &SqliteRow) -> Result<ChatMessage> {
        let sender_type: String = row.get("sender_type");
        let message_type: String = row.get("message_type");
        let media_url: Option<String> = row.get("media_url");

        Ok(ChatMessage {
            id: parse_uuid(row, "id")?,
            conversation_id: row.get("conversation_id"),
            sender_id: parse_uuid(row, "sender_id")?,
            sender_type: sender_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            body: row.get("body"),
            message_type: message_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            media: media_url.map(|url| MediaAttachment {
                url,
                name: row.get("media_name"),
                size: row.get("media_size"),
            }),
            read_at: parse_optional_timestamp(row, "read_at")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid {} ID", column))
}

fn parse_optional_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.get(column);
    value
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid {} ID", column))
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let value: String = row.get(column);
    Decimal::from_str(&value).with_context(|| format!("Invalid {} amount: {}", column, value))
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid {} timestamp", column))?
        .with_timezone(&Utc))
}

fn parse_optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column);
    value
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .with_context(|| format!("Invalid {} timestamp", column))
}
