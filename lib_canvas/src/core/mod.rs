//! # Core Orchestration Module
//!
//! The pieces that decide where a connection goes and when the process is
//! allowed to serve it. Nothing in here knows about Postgres, WebSocket frames
//! or HTML; every collaborator is reached through a narrow trait.
//!
//! ## Core Components:
//!
//! - **`upgrade_router`**: maps an HTTP Upgrade request to exactly one of the
//!   two channel subsystems, or terminates the connection.
//!
//! - **`conditional_cache`**: pre-computed entity tags and bodies for the
//!   generated pages, answering `If-None-Match` with 304.
//!
//! - **`scheduler`**: independent periodic maintenance jobs with per-job
//!   failure isolation.
//!
//! - **`reclaim`**: best-effort release of spare capacity held by pools and
//!   caches, run as a maintenance job.
//!
//! - **`startup`**: the `Initializing -> DataLayerReady -> Listening ->
//!   FullyOperational` state machine that gates the listener on the data layer.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Cache-aware responses for generated pages.
pub mod conditional_cache;
/// Best-effort memory reclamation.
pub mod reclaim;
/// Independent periodic maintenance jobs.
pub mod scheduler;
/// Data layer gating and listener startup.
pub mod startup;
/// Upgrade request dispatch to channel subsystems.
pub mod upgrade_router;

// --- Public API Re-exports ---
pub use conditional_cache::{entity_tag, CacheDecision, CachedPage};
pub use reclaim::{MemoryReclaimer, Reclaim, RECLAIM_JOB};
pub use scheduler::{
    JobAction, JobRecord, JobRecords, MaintenanceJob, MaintenanceScheduler, SchedulerError, SchedulerHandle,
};
pub use startup::{
    Bind, BoxError, DataLayer, DataLayerError, FactionService, RankingService, Running, StartupError, StartupSequencer,
    StartupState, TcpBind,
};
pub use upgrade_router::{
    ChannelSubsystem, Dispatch, RawConnection, UpgradeRequest, UpgradeRoute, UpgradeRouter, API_CHANNEL_PATH,
    USER_CHANNEL_PATH,
};
