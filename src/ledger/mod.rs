//! Ledger module: entity key resolution, entry matching and entry writes

pub mod book;
pub mod keys;
pub mod matcher;

pub use book::*;
pub use keys::*;
pub use matcher::*;
