use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{
    Account, AccountId, ChatMessage, DepositRequest, Product, Rating, TransactionRecord, Voucher,
    Withdrawal,
};

/// Full database snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub transactions: Vec<TransactionRecord>,
    pub products: Vec<Product>,
    pub ratings: Vec<Rating>,
    pub deposit_requests: Vec<DepositRequest>,
    pub withdrawals: Vec<Withdrawal>,
    pub vouchers: Vec<Voucher>,
    pub chat_messages: Vec<ChatMessage>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the transaction log to CSV, in sequence order
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self.service.list_all_transactions().await?;
        let names = self.service.get_account_names().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "timestamp",
            "account",
            "kind",
            "amount",
            "commission",
            "resulting_balance",
            "counterparty",
            "description",
        ])?;

        let name_of = |id: AccountId| names.get(&id).cloned().unwrap_or_else(|| id.to_string());

        let mut count = 0;
        for record in &transactions {
            csv_writer.write_record([
                record.id.to_string(),
                record.sequence.to_string(),
                record.timestamp.to_rfc3339(),
                name_of(record.account_id),
                record.kind.to_string(),
                record.amount.to_string(),
                record.commission.to_string(),
                record.resulting_balance.to_string(),
                record.counterparty.map(name_of).unwrap_or_default(),
                record.description.clone().unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export account balances to CSV
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.service.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "username",
            "email",
            "balance",
            "commission_earned",
            "lucky_order_count",
            "referral_code",
        ])?;

        for account in &accounts {
            csv_writer.write_record([
                account.username.clone(),
                account.email.clone(),
                account.balance.to_string(),
                account.commission_earned.to_string(),
                account.lucky_order_count.to_string(),
                account.referral_code.clone(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export full database as JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts: self.service.list_accounts().await?,
            transactions: self.service.list_all_transactions().await?,
            products: self.service.list_products(true).await?,
            ratings: self.service.list_all_ratings().await?,
            deposit_requests: self.service.list_deposit_requests(None, None).await?,
            withdrawals: self.service.list_withdrawals(None, None).await?,
            vouchers: self.service.list_vouchers(None, None).await?,
            chat_messages: self.service.list_all_messages().await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
