//! Parameter derivation for multi-party PSI runs: group generator search,
//! Bloom filter dimensioning, and per-party seed/topology synthesis, merged
//! into one configuration record per party.

pub mod arith;
pub mod bloom;
pub mod config;
pub mod generator;
pub mod party;
