//! Operator fees and the DRE roll-up

pub mod fees;

pub use fees::*;
