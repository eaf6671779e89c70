//! # Utilities Module
//!
//! Small helpers that do not belong to a specific subsystem.
//!
//! - **`location`**: country code to canvas start coordinates, used by the
//!   main page.

#![forbid(unsafe_code)]

/// Country code to canvas coordinate lookup.
pub mod location;
