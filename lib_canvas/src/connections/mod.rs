//! # Connections Module
//!
//! Persistent connections to external services.

/// PostgreSQL pool and the model registry synced at startup.
pub mod db_postgres;

pub use db_postgres::{canvas_models, PgDataLayer};
