mod account;
mod chat;
mod funding;
mod integrity;
mod ledger;
mod money;
mod product;
mod transaction;
mod voucher;

pub use account::*;
pub use chat::*;
pub use funding::*;
pub use integrity::*;
pub use ledger::*;
pub use money::*;
pub use product::*;
pub use transaction::*;
pub use voucher::*;
