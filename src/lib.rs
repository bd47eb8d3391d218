//! # Settlement Core
//!
//! Weekly settlement engine for poker-club operators: computes what each
//! agent or player owes or is owed, reconciles recorded payments, and carries
//! closing balances into the following week.
//!
//! ## Features
//!
//! - **Rakeback**: pooled agency rates or per-player rates for direct entities, frozen once a week is locked
//! - **Carry-forward**: ordered resolution of each entity's opening balance from prior closed weeks
//! - **Ledger matching**: payments addressed to any alias of an entity are netted against its balance
//! - **Week close**: atomic snapshot and carry-forward write, with verification and repair
//! - **Auto-match**: tiered suggestions linking bank/PIX statement lines to entities
//! - **DRE**: per-subclub operator result after fees, costs and rakeback
//! - **Storage abstraction**: every collaborator call goes through the `SettlementStorage` trait
//!
//! ## Quick Start
//!
//! ```rust
//! use settlement_core::{MemoryStorage, SettlementEngine};
//! use chrono::NaiveDate;
//!
//! # async fn run() -> settlement_core::SettlementResult<()> {
//! let storage = MemoryStorage::new();
//! let mut engine = SettlementEngine::new(storage);
//! let week = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
//!
//! let view = engine.compute_settlement("club-1", week).await?;
//! println!("{} entities, pendente {}", view.entities.len(), view.totals.pendente);
//! engine.close_week("club-1", week).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod settlement;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use reconciliation::*;
pub use settlement::*;
pub use tax::*;
pub use traits::*;
pub use types::*;
pub use utils::MemoryStorage;
