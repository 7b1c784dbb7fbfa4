//! Joiner (`all`/`allSettled`) and bounded-concurrency pool (spec §4.6,
//! §4.7).

pub mod joiner;
pub mod pool;

pub use joiner::{JoinInput, Settled};
