//! Reconciliation of imported bank/PIX statements against settled entities

pub mod auto_match;
pub mod similarity;

pub use auto_match::*;
