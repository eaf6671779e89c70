//! # Memory Reclamation
//!
//! Rust has no collector to force, so "reclaiming memory" means asking every
//! long-lived container (client pools, the ban cache) to hand spare capacity
//! back to the allocator. The outcome is informational only and never checked.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use super::scheduler::{MaintenanceJob, SchedulerError};

/// Name of the reclamation job in the scheduler records.
pub const RECLAIM_JOB: &str = "memory-reclaim";

/// # Reclaim
///
/// Something that can shrink its own allocations on request.
pub trait Reclaim: Send + Sync {
    /// Short name used in logs.
    fn label(&self) -> &str;

    /// Releases spare capacity. Returns a rough count of released slots.
    fn reclaim(&self) -> usize;
}

/// # Memory Reclaimer
///
/// The set of registered [`Reclaim`] targets, swept together.
#[derive(Clone, Default)]
pub struct MemoryReclaimer {
    targets: Vec<Arc<dyn Reclaim>>,
}

impl MemoryReclaimer {
    /// An empty reclaimer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target to the sweep.
    pub fn with_target(mut self, target: Arc<dyn Reclaim>) -> Self {
        self.targets.push(target);
        self
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Sweeps every target once.
    pub fn reclaim_all(&self) {
        for target in &self.targets {
            let released = target.reclaim();
            debug!(target = target.label(), released, "reclaimed spare capacity");
        }
    }

    /// Wraps the sweep as a maintenance job firing every `period`.
    pub fn into_job(self, period: Duration) -> Result<MaintenanceJob, SchedulerError> {
        let reclaimer = Arc::new(self);
        MaintenanceJob::every(RECLAIM_JOB, period, move || {
            let reclaimer = reclaimer.clone();
            async move {
                reclaimer.reclaim_all();
                Ok(())
            }
        })
    }
}
