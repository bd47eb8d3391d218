//! Settlement computation: rakeback, carry-forward, aggregation and week close

pub mod aggregator;
pub mod carry_forward;
pub mod closer;
pub mod core;
pub mod rakeback;

pub use aggregator::*;
pub use carry_forward::*;
pub use closer::*;
pub use self::core::*;
pub use rakeback::*;
