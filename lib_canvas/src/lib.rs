//! # lib_canvas
//!
//! Connection dispatch and process lifecycle for the canvas gateway.
//!
//! - **`core`**: upgrade routing, conditional page cache, maintenance
//!   scheduler, memory reclamation and the startup sequencer.
//! - **`web`**: the axum request router, the accept loop and the glue that
//!   turns hyper upgrades into [`core::UpgradeRequest`] values.
//! - **`channels`**: the two WebSocket channel subsystems and their pools.
//! - **`connections`** / **`services`**: the Postgres data layer and the
//!   ranking and faction computations built on it.
//! - **`configs`** / **`loggers`**: process configuration and tracing setup.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod channels;
pub mod core;
pub mod utils;
pub mod web;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "connections")]
pub mod services;

#[cfg(feature = "loggers")]
pub mod loggers;
