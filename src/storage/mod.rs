mod repository;

pub use repository::*;

/// SQL migration for accounts and the transaction log
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for products and ratings
pub const MIGRATION_002_TASKS: &str = include_str!("migrations/002_tasks.sql");

/// SQL migration for deposit requests and withdrawals
pub const MIGRATION_003_FUNDING: &str = include_str!("migrations/003_funding.sql");

/// SQL migration for support chat
pub const MIGRATION_004_CHAT: &str = include_str!("migrations/004_chat.sql");

/// SQL migration for vouchers
pub const MIGRATION_005_VOUCHERS: &str = include_str!("migrations/005_vouchers.sql");
