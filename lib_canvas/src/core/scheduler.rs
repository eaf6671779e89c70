//! # Maintenance Scheduler
//!
//! Runs independent periodic jobs (ranking refresh, faction refresh, memory
//! reclamation) after the listener is live.
//!
//! Each job gets its own task and its own record. A failing or panicking
//! action is logged and counted at the job boundary; the job keeps its
//! cadence and no other job sees anything. Firings of one job never overlap:
//! the next tick is only observed once the previous action has settled, and a
//! tick that was missed meanwhile fires once, late, instead of being replayed.
//!
//! Shutdown cancels every job, including an action that is mid-flight.
//!
//! Interval jobs run on tokio timers, so tests drive them with a paused clock.
//! Cron jobs are handed to `tokio-cron-scheduler`.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures_util::{future::BoxFuture, FutureExt};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{debug, error, info, warn};

/// A job action. Its `Ok` value carries nothing; only failure is observed.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Errors raised while declaring jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cadence of zero would spin.
    #[error("job `{0}` has a zero cadence")]
    ZeroCadence(String),
    /// The cron expression was rejected.
    #[error("job `{name}` has an invalid cron expression `{expr}`: {reason}")]
    Cron {
        /// Job name.
        name: String,
        /// Expression as given.
        expr: String,
        /// Parser message.
        reason: String,
    },
}

/// Execution counters of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    /// Firings started.
    pub fired: u64,
    /// Firings whose action returned `Ok`.
    pub succeeded: u64,
    /// Firings whose action returned `Err` or panicked.
    pub failed: u64,
    /// Rendered error chain of the latest failure.
    pub last_error: Option<String>,
}

fn lock(record: &Mutex<JobRecord>) -> MutexGuard<'_, JobRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Trigger {
    Interval { period: Duration, action: JobAction },
    Cron(Job),
}

/// # Maintenance Job
///
/// A named recurring action with its cadence.
pub struct MaintenanceJob {
    name: Arc<str>,
    trigger: Trigger,
    record: Arc<Mutex<JobRecord>>,
    stop: CancellationToken,
}

impl fmt::Debug for MaintenanceJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cadence = match &self.trigger {
            Trigger::Interval { period, .. } => format!("every {period:?}"),
            Trigger::Cron(_) => String::from("cron"),
        };
        f.debug_struct("MaintenanceJob")
            .field("name", &self.name)
            .field("cadence", &cadence)
            .finish()
    }
}

impl MaintenanceJob {
    /// A job firing every `period`, first one period after the scheduler starts.
    pub fn every<F, Fut>(name: &str, period: Duration, action: F) -> Result<Self, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::ZeroCadence(name.to_owned()));
        }
        let action: JobAction = Arc::new(move || action().boxed());
        Ok(Self {
            name: Arc::from(name),
            trigger: Trigger::Interval { period, action },
            record: Arc::default(),
            stop: CancellationToken::new(),
        })
    }

    /// A job driven by a six-field (seconds first) cron expression.
    pub fn cron<F, Fut>(name: &str, expr: &str, action: F) -> Result<Self, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job_name: Arc<str> = Arc::from(name);
        let action: JobAction = Arc::new(move || action().boxed());
        let record: Arc<Mutex<JobRecord>> = Arc::default();
        let stop = CancellationToken::new();
        // tokio-cron-scheduler spawns every firing; the gate keeps them in series.
        let gate = Arc::new(tokio::sync::Mutex::new(()));

        let job = {
            let name = job_name.clone();
            let record = record.clone();
            let stop = stop.clone();
            Job::new_async(expr, move |_uuid, _scheduler| {
                let name = name.clone();
                let action = action.clone();
                let record = record.clone();
                let gate = gate.clone();
                let stop = stop.clone();
                Box::pin(async move {
                    let _serial = gate.lock().await;
                    run_guarded(&name, &action, &record, &stop).await;
                })
            })
        }
        .map_err(|e| SchedulerError::Cron {
            name: name.to_owned(),
            expr: expr.to_owned(),
            reason: format!("{e:?}"),
        })?;

        Ok(Self {
            name: job_name,
            trigger: Trigger::Cron(job),
            record,
            stop,
        })
    }

    /// The job's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs one firing and books its outcome. The action runs in its own task so
/// that a panic surfaces as a `JoinError` here instead of unwinding the loop.
/// That task is aborted when `stop` fires or when this future is dropped.
async fn run_guarded(name: &str, action: &JobAction, record: &Mutex<JobRecord>, stop: &CancellationToken) {
    if stop.is_cancelled() {
        return;
    }
    let run = {
        let mut record = lock(record);
        record.fired += 1;
        record.fired
    };
    debug!(job = name, run, "maintenance job firing");

    let task = AbortOnDropHandle::new(tokio::spawn(action()));
    let outcome = tokio::select! {
        outcome = task => outcome,
        _ = stop.cancelled() => {
            debug!(job = name, run, "maintenance job cancelled in flight");
            return;
        }
    };

    let mut record = lock(record);
    match outcome {
        Ok(Ok(())) => record.succeeded += 1,
        Ok(Err(e)) => {
            error!(job = name, run, error = ?e, "maintenance job failed");
            record.failed += 1;
            record.last_error = Some(format!("{e:#}"));
        }
        Err(e) => {
            error!(job = name, run, error = %e, "maintenance job panicked");
            record.failed += 1;
            record.last_error = Some(e.to_string());
        }
    }
}

/// Shared view of every job's record, keyed by job name.
#[derive(Debug, Clone, Default)]
pub struct JobRecords {
    inner: HashMap<Arc<str>, Arc<Mutex<JobRecord>>>,
}

impl JobRecords {
    /// Snapshot of one job's record.
    pub fn get(&self, name: &str) -> Option<JobRecord> {
        self.inner.get(name).map(|record| lock(record).clone())
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no job is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// # Maintenance Scheduler
///
/// Collects jobs, then starts them all at once. Job names are expected to be
/// unique; a duplicate replaces the earlier record in [`JobRecords`].
#[derive(Debug, Default)]
pub struct MaintenanceScheduler {
    jobs: Vec<MaintenanceJob>,
}

impl MaintenanceScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job. Nothing runs until [`start`](Self::start).
    pub fn add(&mut self, job: MaintenanceJob) -> &mut Self {
        if self.jobs.iter().any(|j| j.name == job.name) {
            warn!(job = %job.name, "duplicate maintenance job name");
        }
        self.jobs.push(job);
        self
    }

    /// Records of every registered job, live even before start.
    pub fn records(&self) -> JobRecords {
        JobRecords {
            inner: self
                .jobs
                .iter()
                .map(|job| (job.name.clone(), job.record.clone()))
                .collect(),
        }
    }

    /// Starts every job. A cron engine that fails to come up is logged and
    /// its jobs are skipped; interval jobs are unaffected.
    pub async fn start(self) -> SchedulerHandle {
        let records = self.records();
        let mut tasks = Vec::new();
        let mut stops = Vec::new();
        let mut cron_jobs = Vec::new();

        for job in self.jobs {
            stops.push(job.stop.clone());
            match job.trigger {
                Trigger::Interval { period, action } => {
                    tasks.push(spawn_interval(job.name, period, action, job.record, job.stop));
                }
                Trigger::Cron(cron) => cron_jobs.push((job.name, cron)),
            }
        }

        let cron = if cron_jobs.is_empty() {
            None
        } else {
            start_cron(cron_jobs).await
        };

        info!(jobs = records.len(), "maintenance scheduler started");
        SchedulerHandle {
            tasks,
            stops,
            cron,
            records,
        }
    }
}

fn spawn_interval(
    name: Arc<str>,
    period: Duration,
    action: JobAction,
    record: Arc<Mutex<JobRecord>>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_guarded(&name, &action, &record, &stop).await;
        }
    })
}

async fn start_cron(jobs: Vec<(Arc<str>, Job)>) -> Option<JobScheduler> {
    let scheduler = match JobScheduler::new().await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = ?e, "could not create cron scheduler, cron jobs disabled");
            return None;
        }
    };
    for (name, job) in jobs {
        if let Err(e) = scheduler.add(job).await {
            error!(job = %name, error = ?e, "could not register cron job");
        }
    }
    if let Err(e) = scheduler.start().await {
        error!(error = ?e, "could not start cron scheduler, cron jobs disabled");
        return None;
    }
    Some(scheduler)
}

/// # Scheduler Handle
///
/// Owns the running jobs. Jobs only stop through [`shutdown`](Self::shutdown)
/// at process exit.
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
    stops: Vec<CancellationToken>,
    cron: Option<JobScheduler>,
    records: JobRecords,
}

impl SchedulerHandle {
    /// Live records of every job.
    pub fn records(&self) -> &JobRecords {
        &self.records
    }

    /// Stops every job. An action in flight is aborted at its next await and
    /// its firing is booked neither as success nor as failure.
    pub async fn shutdown(self) {
        for stop in &self.stops {
            stop.cancel();
        }
        for task in &self.tasks {
            task.abort();
        }
        if let Some(mut cron) = self.cron {
            if let Err(e) = cron.shutdown().await {
                warn!(error = ?e, "cron scheduler did not shut down cleanly");
            }
        }
        info!("maintenance scheduler stopped");
    }
}
