use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::application::{DepositInput, LedgerService, RatingInput};
use crate::config::ConfigArgs;
use crate::domain::{
    format_amount, format_commission, parse_amount, Amount, DepositMethod, MediaAttachment,
    MessageType, ReviewStatus, SenderType, TransactionKind, VoucherStatus, WithdrawalMethod,
};

/// Lucrum - balance and commission ledger for rating tasks
#[derive(Parser)]
#[command(name = "lucrum")]
#[command(about = "Balance ledger with deposit commissions, rating tasks and referral bonuses")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "LUCRUM_DATABASE", default_value = "lucrum.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Credit a deposit to an account
    Deposit {
        /// Account username
        username: String,

        /// Amount to deposit (e.g., "100.00" or "100")
        amount: String,

        /// Credit the lucky order commission on top of the deposit
        #[arg(long)]
        lucky: bool,
    },

    /// Deposit requests awaiting review
    #[command(subcommand)]
    DepositRequest(DepositRequestCommands),

    /// Product catalogue commands
    #[command(subcommand)]
    Product(ProductCommands),

    /// Rate a product to earn its commission
    Rate {
        /// Account username
        username: String,

        /// Product ID
        product: String,

        /// Star rating (only 5 is accepted)
        #[arg(short, long, default_value = "5")]
        stars: u8,
    },

    /// Referral commands
    #[command(subcommand)]
    Referral(ReferralCommands),

    /// Withdrawal commands
    #[command(subcommand)]
    Withdrawal(WithdrawalCommands),

    /// Voucher commands
    #[command(subcommand)]
    Voucher(VoucherCommands),

    /// List transactions of an account, most recent first
    Transactions {
        /// Account username
        username: String,

        /// Filter by kind: deposit, rating_commission, referral_bonus, withdrawal,
        /// withdrawal_refund, voucher_generation, voucher_redemption
        #[arg(short, long)]
        kind: Option<String>,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Support chat commands
    #[command(subcommand)]
    Chat(ChatCommands),

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// Username (must be unique)
        username: String,

        /// Email address (must be unique)
        email: String,

        /// Referral code of the inviting account
        #[arg(short, long = "ref")]
        referral_code: Option<String>,
    },

    /// List all accounts
    List,

    /// Show account details
    Show {
        /// Account username
        username: String,
    },
}

#[derive(Subcommand)]
pub enum DepositRequestCommands {
    /// File a deposit for review
    Create {
        /// Account username
        username: String,

        /// Amount to deposit
        amount: String,

        /// Payment method: bank_transfer, crypto, paypal, other
        #[arg(short, long, default_value = "crypto")]
        method: String,

        /// Address or reference the funds were sent from
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List deposit requests
    List {
        /// Filter by username
        #[arg(short, long)]
        username: Option<String>,

        /// Filter by status: pending, approved, rejected
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Approve a pending request and credit the deposit
    Approve {
        /// Deposit request ID
        id: String,
    },

    /// Reject a pending request
    Reject {
        /// Deposit request ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Add a product to the catalogue
    Add {
        /// Product name
        name: String,

        /// Product price
        price: String,

        #[arg(short, long, default_value = "general")]
        category: String,
    },

    /// List products in rating order
    List {
        /// Include deactivated products
        #[arg(short, long)]
        all: bool,
    },

    /// Remove a product from the active catalogue
    Deactivate {
        /// Product ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ReferralCommands {
    /// Check which account owns a referral code
    Validate {
        code: String,
    },

    /// Show referral statistics
    Stats {
        /// Account username
        username: String,
    },

    /// Print the referral link of an account
    Link {
        /// Account username
        username: String,
    },

    /// Pay a referral commission
    Commission {
        /// Referrer username
        referrer: String,

        /// Referred username
        referred: String,

        /// Commission amount
        amount: String,
    },
}

#[derive(Subcommand)]
pub enum WithdrawalCommands {
    /// Set the payout method and address
    Setup {
        /// Account username
        username: String,

        /// Method: TRC20, ERC20, BEP20, "Bank Transfer"
        #[arg(short, long)]
        method: String,

        /// Wallet address or bank account
        #[arg(short, long)]
        address: String,
    },

    /// Request a withdrawal
    Request {
        /// Account username
        username: String,

        /// Amount to withdraw
        amount: String,
    },

    /// List withdrawals
    List {
        /// Filter by username
        #[arg(short, long)]
        username: Option<String>,

        /// Filter by status: pending, approved, rejected
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Mark a pending withdrawal as paid
    Approve {
        /// Withdrawal ID
        id: String,
    },

    /// Reject a pending withdrawal and refund it
    Reject {
        /// Withdrawal ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum VoucherCommands {
    /// Set part of the balance aside under a shareable code
    Generate {
        /// Account username
        username: String,

        /// Voucher amount
        amount: String,
    },

    /// Redeem a code; its amount is paid back to the voucher owner
    Redeem {
        /// Redeeming account username
        username: String,

        /// Voucher code
        code: String,
    },

    /// List vouchers
    List {
        /// Filter by owner username
        #[arg(short, long)]
        username: Option<String>,

        /// Filter by status: active, used, expired
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ChatCommands {
    /// Send a message in an account's support conversation
    Send {
        /// Account whose support conversation to post in
        username: String,

        /// Message text
        message: String,

        /// Send as support staff under this username
        #[arg(long)]
        admin: Option<String>,

        /// URL of an attached image or file
        #[arg(long)]
        attachment: Option<String>,
    },

    /// Show an account's support conversation
    Show {
        /// Account username
        username: String,
    },

    /// Mark a message as read
    Read {
        /// Message ID
        id: String,
    },
}

impl Cli {
    fn init_tracing(&self) {
        let default_level = if self.verbose { "debug" } else { "warn" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("lucrum={}", default_level)));

        // Ignore the error if a subscriber is already installed
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub async fn run(self) -> Result<()> {
        self.init_tracing();
        let config = self.config.into_config()?;

        if let Commands::Init = self.command {
            LedgerService::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, config)
            .await
            .with_context(|| format!("Failed to open database '{}'", self.database))?;

        match self.command {
            Commands::Init => {}

            Commands::Account(cmd) => run_account_command(&service, cmd).await?,

            Commands::Deposit {
                username,
                amount,
                lucky,
            } => {
                let input = DepositInput {
                    amount: parse_money(&amount)?,
                    is_lucky_order_commission: lucky,
                };
                let receipt = service.deposit(&username, input).await?;

                println!("Deposited {} to {}", format_amount(receipt.deposit_amount), username);
                if lucky {
                    println!(
                        "  Lucky order commission: {}",
                        format_commission(receipt.commission)
                    );
                }
                println!("  Total received:         {}", format_commission(receipt.total_received));
                println!("  New balance:            {}", format_amount(receipt.new_balance));
            }

            Commands::DepositRequest(cmd) => run_deposit_request_command(&service, cmd).await?,

            Commands::Product(cmd) => run_product_command(&service, cmd).await?,

            Commands::Rate {
                username,
                product,
                stars,
            } => {
                let input = RatingInput {
                    product_id: parse_id(&product, "product")?,
                    rating: stars,
                };
                let receipt = service.rate_product(&username, input).await?;

                println!("Rated {} ({} stars)", receipt.product_name, receipt.rating.stars);
                println!("  Price:       {}", format_amount(receipt.rating.product_price));
                println!("  Profit:      {}", format_amount(receipt.profit));
                println!("  New balance: {}", format_amount(receipt.new_balance));
            }

            Commands::Referral(cmd) => run_referral_command(&service, cmd).await?,

            Commands::Withdrawal(cmd) => run_withdrawal_command(&service, cmd).await?,

            Commands::Voucher(cmd) => run_voucher_command(&service, cmd).await?,

            Commands::Transactions {
                username,
                kind,
                limit,
            } => {
                let kind = kind
                    .map(|k| k.parse::<TransactionKind>())
                    .transpose()
                    .map_err(|e| anyhow::anyhow!(e))?;
                run_transactions_command(&service, &username, kind, limit).await?;
            }

            Commands::Chat(cmd) => run_chat_command(&service, cmd).await?,

            Commands::Check => run_check_command(&service).await?,

            Commands::Export {
                export_type,
                output,
            } => run_export_command(&service, &export_type, output.as_deref()).await?,
        }

        Ok(())
    }
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            username,
            email,
            referral_code,
        } => {
            let account = service.create_account(username, email, referral_code).await?;
            println!("Created account: {} ({})", account.username, account.email);
            println!("  Referral code: {}", account.referral_code);
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<20} {:<28} {:>12} {:<10}",
                    "USERNAME", "EMAIL", "BALANCE", "CODE"
                );
                println!("{}", "-".repeat(73));
                for account in accounts {
                    println!(
                        "{:<20} {:<28} {:>12} {:<10}",
                        truncate(&account.username, 20),
                        truncate(&account.email, 28),
                        format_amount(account.balance),
                        account.referral_code
                    );
                }
            }
        }

        AccountCommands::Show { username } => {
            let info = service.get_account_info(&username).await?;
            let account = &info.account;

            println!("Account: {}", account.username);
            println!("  ID:               {}", account.id);
            println!("  Email:            {}", account.email);
            println!("  Balance:          {}", format_amount(account.balance));
            println!(
                "  Earnings today:   {}",
                format_commission(account.total_earnings_today)
            );
            println!(
                "  Commission:       {}",
                format_commission(account.commission_earned)
            );
            println!("  Lucky orders:     {}", account.lucky_order_count);
            println!("  Referral code:    {}", account.referral_code);
            if let Some(referrer) = &info.referrer {
                println!("  Referred by:      {}", referrer);
            }
            println!("  Referred users:   {}", info.referred_count);
            if let (Some(method), Some(address)) =
                (account.withdrawal_method, &account.withdrawal_address)
            {
                println!("  Withdrawal:       {} {}", method, address);
            }
            println!(
                "  Created:          {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Transactions:     {}", info.transaction_count);
            if let Some(last) = info.last_activity {
                println!("  Last activity:    {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }
    }
    Ok(())
}

async fn run_deposit_request_command(
    service: &LedgerService,
    cmd: DepositRequestCommands,
) -> Result<()> {
    match cmd {
        DepositRequestCommands::Create {
            username,
            amount,
            method,
            address,
            notes,
        } => {
            let method: DepositMethod = method.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
            let request = service
                .request_deposit(&username, parse_money(&amount)?, method, address, notes)
                .await?;
            println!(
                "Deposit request {} for {} is pending review",
                request.id,
                format_amount(request.amount)
            );
        }

        DepositRequestCommands::List { username, status } => {
            let status = parse_status(status.as_deref())?;
            let requests = service
                .list_deposit_requests(username.as_deref(), status)
                .await?;
            if requests.is_empty() {
                println!("No deposit requests found.");
                return Ok(());
            }

            let names = service.get_account_names().await?;
            println!(
                "{:<36}  {:<16} {:>12} {:<14} {:<9} {:<12}",
                "ID", "ACCOUNT", "AMOUNT", "METHOD", "STATUS", "DATE"
            );
            println!("{}", "-".repeat(104));
            for request in requests {
                let name = names.get(&request.account_id).map(|s| s.as_str()).unwrap_or("?");
                println!(
                    "{:<36}  {:<16} {:>12} {:<14} {:<9} {:<12}",
                    request.id,
                    truncate(name, 16),
                    format_amount(request.amount),
                    request.method,
                    request.status,
                    request.created_at.format("%Y-%m-%d")
                );
            }
        }

        DepositRequestCommands::Approve { id } => {
            let receipt = service
                .approve_deposit_request(parse_id(&id, "deposit request")?)
                .await?;
            println!(
                "Approved deposit of {}; new balance {}",
                format_amount(receipt.deposit_amount),
                format_amount(receipt.new_balance)
            );
        }

        DepositRequestCommands::Reject { id } => {
            let request = service
                .reject_deposit_request(parse_id(&id, "deposit request")?)
                .await?;
            println!("Rejected deposit request {}", request.id);
        }
    }
    Ok(())
}

async fn run_product_command(service: &LedgerService, cmd: ProductCommands) -> Result<()> {
    match cmd {
        ProductCommands::Add {
            name,
            price,
            category,
        } => {
            let product = service
                .add_product(name, parse_money(&price)?, category)
                .await?;
            println!(
                "Added product: {} ({}) {}",
                product.name,
                format_amount(product.price),
                product.id
            );
        }

        ProductCommands::List { all } => {
            let products = service.list_products(all).await?;
            if products.is_empty() {
                println!("No products found.");
                return Ok(());
            }

            println!(
                "{:<36}  {:<24} {:>10} {:<14} {}",
                "ID", "NAME", "PRICE", "CATEGORY", "STATUS"
            );
            println!("{}", "-".repeat(96));
            for product in products {
                println!(
                    "{:<36}  {:<24} {:>10} {:<14} {}",
                    product.id,
                    truncate(&product.name, 24),
                    format_amount(product.price),
                    truncate(&product.category, 14),
                    if product.active { "active" } else { "inactive" }
                );
            }
        }

        ProductCommands::Deactivate { id } => {
            let product = service.deactivate_product(parse_id(&id, "product")?).await?;
            println!("Deactivated product: {}", product.name);
        }
    }
    Ok(())
}

async fn run_referral_command(service: &LedgerService, cmd: ReferralCommands) -> Result<()> {
    match cmd {
        ReferralCommands::Validate { code } => {
            let referrer = service.validate_referral_code(&code).await?;
            println!("Valid referral code from {}", referrer.username);
        }

        ReferralCommands::Stats { username } => {
            let stats = service.referral_stats(&username).await?;

            println!("Referral code: {}", stats.referral_code);
            println!("Referral link: {}", stats.referral_link);
            println!("Referred users:     {}", stats.total_referred_users);
            println!(
                "Total commissions:  {}",
                format_commission(stats.total_commissions)
            );
            println!("Balance:            {}", format_amount(stats.user_balance));

            if !stats.referred_users.is_empty() {
                println!();
                println!(
                    "{:<20} {:<28} {:>12} {:>12} {:<12}",
                    "USERNAME", "EMAIL", "BALANCE", "COMMISSION", "JOINED"
                );
                println!("{}", "-".repeat(88));
                for user in &stats.referred_users {
                    println!(
                        "{:<20} {:<28} {:>12} {:>12} {:<12}",
                        truncate(&user.username, 20),
                        truncate(&user.email, 28),
                        format_amount(user.balance),
                        format_commission(user.commission),
                        user.joined_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        ReferralCommands::Link { username } => {
            println!("{}", service.referral_link(&username).await?);
        }

        ReferralCommands::Commission {
            referrer,
            referred,
            amount,
        } => {
            let result = service
                .add_referral_commission(&referrer, &referred, parse_money(&amount)?)
                .await?;
            println!(
                "Paid {} referral commission to {}",
                format_commission(result.commission_amount),
                referrer
            );
            println!(
                "  New balance:      {}",
                format_amount(result.new_referrer_balance)
            );
            println!(
                "  Total commission: {}",
                format_commission(result.total_commission_earned)
            );
        }
    }
    Ok(())
}

async fn run_withdrawal_command(service: &LedgerService, cmd: WithdrawalCommands) -> Result<()> {
    match cmd {
        WithdrawalCommands::Setup {
            username,
            method,
            address,
        } => {
            let method: WithdrawalMethod = method.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
            let account = service.setup_withdrawal(&username, method, address).await?;
            println!(
                "Withdrawals for {} go to {} via {}",
                account.username,
                account.withdrawal_address.unwrap_or_default(),
                method
            );
        }

        WithdrawalCommands::Request { username, amount } => {
            let result = service
                .request_withdrawal(&username, parse_money(&amount)?)
                .await?;
            println!(
                "Withdrawal {} of {} requested",
                result.withdrawal.id,
                format_amount(result.withdrawal.amount)
            );
            println!("  Fee:         {}", format_amount(result.withdrawal.fee));
            println!("  New balance: {}", format_amount(result.new_balance));
        }

        WithdrawalCommands::List { username, status } => {
            let status = parse_status(status.as_deref())?;
            let withdrawals = service.list_withdrawals(username.as_deref(), status).await?;
            if withdrawals.is_empty() {
                println!("No withdrawals found.");
                return Ok(());
            }

            let names = service.get_account_names().await?;
            println!(
                "{:<36}  {:<16} {:>12} {:>8} {:<14} {:<9}",
                "ID", "ACCOUNT", "AMOUNT", "FEE", "METHOD", "STATUS"
            );
            println!("{}", "-".repeat(100));
            for withdrawal in withdrawals {
                let name = names
                    .get(&withdrawal.account_id)
                    .map(|s| s.as_str())
                    .unwrap_or("?");
                println!(
                    "{:<36}  {:<16} {:>12} {:>8} {:<14} {:<9}",
                    withdrawal.id,
                    truncate(name, 16),
                    format_amount(withdrawal.amount),
                    format_amount(withdrawal.fee),
                    withdrawal.method,
                    withdrawal.status
                );
            }
        }

        WithdrawalCommands::Approve { id } => {
            let result = service.approve_withdrawal(parse_id(&id, "withdrawal")?).await?;
            println!(
                "Approved withdrawal {}; pay out {}",
                result.withdrawal.id,
                format_amount(result.withdrawal.net_payout())
            );
        }

        WithdrawalCommands::Reject { id } => {
            let result = service.reject_withdrawal(parse_id(&id, "withdrawal")?).await?;
            println!(
                "Rejected withdrawal {}; refunded {}, new balance {}",
                result.withdrawal.id,
                format_amount(result.withdrawal.amount),
                format_amount(result.new_balance)
            );
        }
    }
    Ok(())
}

async fn run_voucher_command(service: &LedgerService, cmd: VoucherCommands) -> Result<()> {
    match cmd {
        VoucherCommands::Generate { username, amount } => {
            let receipt = service
                .generate_voucher(&username, parse_money(&amount)?)
                .await?;
            println!(
                "Voucher {} worth {} generated",
                receipt.voucher.code,
                format_amount(receipt.voucher.amount)
            );
            println!("  Expires:     {}", receipt.voucher.expires_at.format("%Y-%m-%d %H:%M"));
            println!("  New balance: {}", format_amount(receipt.new_balance));
        }

        VoucherCommands::Redeem { username, code } => {
            let redemption = service.redeem_voucher(&username, &code).await?;
            println!(
                "Voucher {} redeemed: {} added to {}'s account",
                redemption.voucher.code,
                format_amount(redemption.voucher.amount),
                redemption.owner
            );
        }

        VoucherCommands::List { username, status } => {
            let status = status
                .map(|s| s.parse::<VoucherStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let vouchers = service.list_vouchers(username.as_deref(), status).await?;
            if vouchers.is_empty() {
                println!("No vouchers found.");
                return Ok(());
            }

            let names = service.get_account_names().await?;
            println!(
                "{:<19}  {:<16} {:>12} {:<8} {:<16}",
                "CODE", "OWNER", "AMOUNT", "STATUS", "EXPIRES"
            );
            println!("{}", "-".repeat(76));
            for voucher in vouchers {
                let name = names
                    .get(&voucher.owner_id)
                    .map(|s| s.as_str())
                    .unwrap_or("?");
                println!(
                    "{:<19}  {:<16} {:>12} {:<8} {:<16}",
                    voucher.code,
                    truncate(name, 16),
                    format_amount(voucher.amount),
                    voucher.status.as_str(),
                    voucher.expires_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

async fn run_transactions_command(
    service: &LedgerService,
    username: &str,
    kind: Option<TransactionKind>,
    limit: Option<usize>,
) -> Result<()> {
    let transactions = service.list_transactions(username, kind, limit).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<17} {:<18} {:>10} {:>12} {:>12} DESCRIPTION",
        "DATE", "KIND", "AMOUNT", "COMMISSION", "BALANCE"
    );
    println!("{}", "-".repeat(100));
    for record in &transactions {
        println!(
            "{:<17} {:<18} {:>10} {:>12} {:>12} {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.kind,
            format_amount(record.amount),
            format_commission(record.commission),
            format_amount(record.resulting_balance),
            truncate(record.description.as_deref().unwrap_or(""), 40)
        );
    }
    Ok(())
}

async fn run_chat_command(service: &LedgerService, cmd: ChatCommands) -> Result<()> {
    match cmd {
        ChatCommands::Send {
            username,
            message,
            admin,
            attachment,
        } => {
            let conversation = service.support_conversation(&username).await?;
            let (sender, sender_type) = match &admin {
                Some(staff) => (staff.as_str(), SenderType::Admin),
                None => (username.as_str(), SenderType::User),
            };
            let attachment = attachment.map(|url| {
                let message_type = if is_image(&url) {
                    MessageType::Image
                } else {
                    MessageType::File
                };
                let name = url.rsplit('/').next().map(str::to_string);
                (
                    message_type,
                    MediaAttachment {
                        url,
                        name,
                        size: None,
                    },
                )
            });

            let sent = service
                .send_message(&conversation, sender, sender_type, message, attachment)
                .await?;
            println!("Sent message {}", sent.id);
        }

        ChatCommands::Show { username } => {
            let conversation = service.support_conversation(&username).await?;
            let messages = service.conversation(&conversation).await?;
            if messages.is_empty() {
                println!("No messages.");
                return Ok(());
            }

            let names = service.get_account_names().await?;
            for message in &messages {
                let sender = names
                    .get(&message.sender_id)
                    .map(|s| s.as_str())
                    .unwrap_or("?");
                println!(
                    "[{}] {} ({}){}: {}",
                    message.created_at.format("%Y-%m-%d %H:%M"),
                    sender,
                    message.sender_type,
                    if message.is_read() { "" } else { " *" },
                    message.body
                );
                if let Some(media) = &message.media {
                    println!("    {} {}", message.message_type.as_str(), media.url);
                }
            }

            let unread = service.unread_count(&conversation, SenderType::Admin).await?;
            if unread > 0 {
                println!();
                println!("{} unread message(s) from support", unread);
            }
        }

        ChatCommands::Read { id } => {
            let message = service.mark_message_read(parse_id(&id, "message")?).await?;
            if let Some(read_at) = message.read_at {
                println!(
                    "Message {} read at {}",
                    message.id,
                    read_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    println!(
        "Sequence:     {}",
        if report.has_sequence_gaps {
            "GAPS FOUND"
        } else {
            "OK"
        }
    );
    println!();

    if report.is_ok() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "balances" => {
            let count = exporter.export_balances_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} accounts, {} transactions, {} products",
                    snapshot.accounts.len(),
                    snapshot.transactions.len(),
                    snapshot.products.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, balances, full",
                export_type
            );
        }
    }

    Ok(())
}

fn parse_money(input: &str) -> Result<Amount> {
    parse_amount(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn parse_id(input: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim())
        .with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn parse_status(input: Option<&str>) -> Result<Option<ReviewStatus>> {
    input
        .map(|s| s.parse::<ReviewStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))
}

fn is_image(url: &str) -> bool {
    let lower = url.to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
