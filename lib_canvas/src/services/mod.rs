//! # Services Module
//!
//! The startup and periodic computations backed by Postgres.

/// Faction member counts and the in-memory ban list.
pub mod factions;
/// User rank recomputation.
pub mod ranking;

pub use factions::{BanList, PgFactions};
pub use ranking::PgRanking;
