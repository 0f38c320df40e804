pub mod drawdown;
pub mod ledger;
pub mod models;
pub mod shared;
pub mod store;

pub use drawdown::DrawdownTracker;
pub use ledger::Ledger;
pub use models::*;
pub use shared::SharedLedger;
pub use store::{AuditRecord, SqliteStore, StoreError, TradeStore};
