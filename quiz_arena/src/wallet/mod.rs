//! Wallet module: token balances behind an append-only ledger.
//!
//! This module implements:
//! - Append-only transaction records carrying a `balance_after` snapshot
//! - Idempotency keys to prevent duplicate credits on retry
//! - Per-user serialization of every balance mutation
//!
//! ## Example
//!
//! ```no_run
//! use quiz_arena::db::memory::InMemoryStore;
//! use quiz_arena::wallet::{TransactionKind, WalletManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let wallet = WalletManager::new(store);
//!
//!     let balance = wallet
//!         .credit(1, 15, TransactionKind::Earn, "Daily Rush reward", None, "daily:1:2026-10-16")
//!         .await?;
//!     println!("New balance: {}", balance);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{WalletError, WalletResult};
pub use manager::WalletManager;
pub use models::{
    LedgerOutcome, NewTransaction, RelatedEntity, TransactionKind, WalletTransaction,
};
