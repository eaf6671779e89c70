//! # Startup Sequencer
//!
//! Gates public availability on the data layer:
//!
//! ```text
//! Initializing --associate+sync--> DataLayerReady --bind--> Listening
//!      |                                |                      |
//!      +-------- Aborted <--------------+          one-shots, readiness log,
//!                                                  scheduler start
//!                                                              |
//!                                                      FullyOperational
//! ```
//!
//! A failed sync or a failed bind is fatal. There is no retry; the caller is
//! expected to exit the process.

use std::{error::Error as StdError, fmt, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::scheduler::{JobRecords, MaintenanceScheduler, SchedulerHandle};
use crate::web::listener;

/// Boxed error used by collaborators whose concrete error type is their own.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors from the data layer entry points.
#[derive(Debug, Error)]
pub enum DataLayerError {
    /// The backing store could not be reached.
    #[error("data layer unavailable")]
    Unavailable(#[source] BoxError),
    /// The declared model relationships are inconsistent.
    #[error("invalid model relationships: {0}")]
    Relationships(String),
    /// A model failed to sync.
    #[error("failed to sync model `{model}`")]
    Sync {
        /// Model being synced.
        model: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },
}

/// # Data Layer
///
/// Called exactly once each, `associate` first, before the listener binds.
#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Wires relationships between models. Purely in-memory.
    fn associate(&self) -> Result<(), DataLayerError>;

    /// Brings the backing store in line with the models.
    async fn sync(&self) -> Result<(), DataLayerError>;
}

/// Ranking recomputation, run once at startup and optionally on a cadence.
#[async_trait]
pub trait RankingService: Send + Sync {
    /// Recomputes user rankings.
    async fn update_ranking(&self) -> anyhow::Result<()>;
}

/// Faction state recomputation, run once at startup and optionally on a cadence.
#[async_trait]
pub trait FactionService: Send + Sync {
    /// Recomputes faction state.
    async fn update(&self) -> anyhow::Result<()>;

    /// Reloads the ban list.
    async fn update_bans(&self) -> anyhow::Result<()>;
}

/// How the listener gets bound.
#[async_trait]
pub trait Bind: Send + Sync {
    /// Binds a TCP listener on `addr`.
    async fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener>;
}

/// Binds with [`TcpListener::bind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpBind;

#[async_trait]
impl Bind for TcpBind {
    async fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }
}

/// Lifecycle position of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    /// Data layer not ready yet.
    Initializing,
    /// Models associated and synced.
    DataLayerReady,
    /// Listener bound and accepting.
    Listening,
    /// One-shots triggered and scheduler started.
    FullyOperational,
    /// Startup failed; nothing is listening.
    Aborted,
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::DataLayerReady => "data-layer-ready",
            Self::Listening => "listening",
            Self::FullyOperational => "fully-operational",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Associate or sync failed.
    #[error("data layer initialization failed")]
    DataLayer(#[from] DataLayerError),
    /// The listener could not be bound.
    #[error("could not bind listener on {addr}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Cause.
        #[source]
        source: io::Error,
    },
}

/// # Startup Sequencer
///
/// Owns everything needed to bring the process up. Consumed by
/// [`run`](Self::run).
pub struct StartupSequencer {
    addr: SocketAddr,
    data_layer: Arc<dyn DataLayer>,
    ranking: Arc<dyn RankingService>,
    factions: Arc<dyn FactionService>,
    app: Router,
    scheduler: MaintenanceScheduler,
    binder: Arc<dyn Bind>,
    state: watch::Sender<StartupState>,
}

impl StartupSequencer {
    /// A sequencer binding `addr` with [`TcpBind`].
    pub fn new(
        addr: SocketAddr,
        data_layer: Arc<dyn DataLayer>,
        ranking: Arc<dyn RankingService>,
        factions: Arc<dyn FactionService>,
        app: Router,
        scheduler: MaintenanceScheduler,
    ) -> Self {
        let (state, _) = watch::channel(StartupState::Initializing);
        Self {
            addr,
            data_layer,
            ranking,
            factions,
            app,
            scheduler,
            binder: Arc::new(TcpBind),
            state,
        }
    }

    /// Replaces the binder.
    pub fn with_binder(mut self, binder: Arc<dyn Bind>) -> Self {
        self.binder = binder;
        self
    }

    /// Watches the lifecycle state.
    pub fn state(&self) -> watch::Receiver<StartupState> {
        self.state.subscribe()
    }

    /// Runs the sequence to `FullyOperational`, or stops at `Aborted`.
    pub async fn run(self) -> Result<Running, StartupError> {
        let Self {
            addr,
            data_layer,
            ranking,
            factions,
            app,
            scheduler,
            binder,
            state,
        } = self;

        // --- Phase 1: data layer ---
        info!("initializing data layer");
        let ready = match data_layer.associate() {
            Ok(()) => data_layer.sync().await,
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            let e = StartupError::from(e);
            let causes: Vec<String> = anyhow::Chain::new(&e).map(|cause| cause.to_string()).collect();
            error!(error = %causes.join(": "), "data layer initialization failed, not listening");
            state.send_replace(StartupState::Aborted);
            return Err(e);
        }
        state.send_replace(StartupState::DataLayerReady);

        // --- Phase 2: listener ---
        let tcp = match binder.bind(addr).await {
            Ok(tcp) => tcp,
            Err(source) => {
                error!(%addr, error = %source, "could not bind listener");
                state.send_replace(StartupState::Aborted);
                return Err(StartupError::Bind { addr, source });
            }
        };
        let local_addr = tcp.local_addr().map_err(|source| {
            state.send_replace(StartupState::Aborted);
            StartupError::Bind { addr, source }
        })?;
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(listener::serve(tcp, app, shutdown.clone()));
        state.send_replace(StartupState::Listening);

        // --- Phase 3: one-shots, then jobs ---
        let bans = factions.clone();
        spawn_once("ranking", async move { ranking.update_ranking().await });
        spawn_once("factions", async move { factions.update().await });
        spawn_once("bans", async move { bans.update_bans().await });

        info!(port = local_addr.port(), "web is running at http://localhost:{}/", local_addr.port());

        let jobs = scheduler.start().await;
        state.send_replace(StartupState::FullyOperational);

        Ok(Running {
            local_addr,
            server,
            shutdown,
            jobs,
        })
    }
}

fn spawn_once<Fut>(name: &'static str, computation: Fut)
where
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = computation.await {
            error!(computation = name, error = ?e, "startup computation failed");
        }
    });
}

/// # Running
///
/// A fully started process: the accept loop and the maintenance jobs.
pub struct Running {
    local_addr: SocketAddr,
    server: JoinHandle<()>,
    shutdown: CancellationToken,
    jobs: SchedulerHandle,
}

impl Running {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live records of the maintenance jobs.
    pub fn job_records(&self) -> &JobRecords {
        self.jobs.records()
    }

    /// Stops accepting, lets open connections finish gracefully and stops the
    /// jobs.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.jobs.shutdown().await;
        if let Err(e) = self.server.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
        info!("server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::MaintenanceJob;
    use axum::routing::get;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    struct FakeData {
        fail_sync: Option<&'static str>,
        associated: AtomicUsize,
        synced: AtomicUsize,
    }

    impl FakeData {
        fn new(fail_sync: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fail_sync,
                associated: AtomicUsize::new(0),
                synced: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DataLayer for FakeData {
        fn associate(&self) -> Result<(), DataLayerError> {
            self.associated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn sync(&self) -> Result<(), DataLayerError> {
            assert_eq!(self.associated.load(Ordering::SeqCst), 1, "sync before associate");
            self.synced.fetch_add(1, Ordering::SeqCst);
            match self.fail_sync {
                Some(reason) => Err(DataLayerError::Unavailable(reason.into())),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct Computations {
        ranking: AtomicUsize,
        factions: AtomicUsize,
        bans: AtomicUsize,
    }

    impl Computations {
        fn total(&self) -> usize {
            self.ranking.load(Ordering::SeqCst) + self.factions.load(Ordering::SeqCst) + self.bans.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RankingService for Computations {
        async fn update_ranking(&self) -> anyhow::Result<()> {
            self.ranking.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl FactionService for Computations {
        async fn update(&self) -> anyhow::Result<()> {
            self.factions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_bans(&self) -> anyhow::Result<()> {
            self.bans.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("ban table empty")
        }
    }

    #[derive(Default)]
    struct CountingBind {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Bind for CountingBind {
        async fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TcpListener::bind(addr).await
        }
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn app() -> Router {
        Router::new().route("/health", get(|| async { "OK" }))
    }

    fn sequencer(
        addr: SocketAddr,
        data: Arc<FakeData>,
        work: Arc<Computations>,
        scheduler: MaintenanceScheduler,
        binder: Arc<CountingBind>,
    ) -> StartupSequencer {
        StartupSequencer::new(addr, data, work.clone(), work, app(), scheduler).with_binder(binder)
    }

    #[tokio::test]
    async fn test_sync_failure_never_binds() {
        let (logs, _guard) = capture_logs();
        let data = FakeData::new(Some("X"));
        let work = Arc::new(Computations::default());
        let binder = Arc::new(CountingBind::default());
        let seq = sequencer(loopback(), data.clone(), work.clone(), MaintenanceScheduler::new(), binder.clone());
        let state = seq.state();

        let err = seq.run().await.err().unwrap();

        assert!(matches!(err, StartupError::DataLayer(DataLayerError::Unavailable(_))));
        assert_eq!(*state.borrow(), StartupState::Aborted);
        assert_eq!(binder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(data.synced.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert_eq!(work.total(), 0);

        let logged = logs.contents();
        assert!(
            logged.contains("data layer initialization failed: data layer unavailable: X"),
            "log was: {logged}"
        );
        assert!(!logged.contains("web is running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_runs_one_shots_before_first_job() {
        let (logs, _guard) = capture_logs();
        let data = FakeData::new(None);
        let work = Arc::new(Computations::default());
        let binder = Arc::new(CountingBind::default());

        let seen_at_fire = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = MaintenanceScheduler::new();
        {
            let work = work.clone();
            let seen = seen_at_fire.clone();
            scheduler.add(
                MaintenanceJob::every("probe", Duration::from_secs(900), move || {
                    let total = work.total();
                    seen.lock().unwrap().push(total);
                    async { Ok(()) }
                })
                .unwrap(),
            );
        }

        let seq = sequencer(loopback(), data.clone(), work.clone(), scheduler, binder.clone());
        let state = seq.state();
        let running = seq.run().await.unwrap();

        assert_eq!(*state.borrow(), StartupState::FullyOperational);
        assert_eq!(binder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(data.associated.load(Ordering::SeqCst), 1);
        assert_eq!(data.synced.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1801)).await;

        assert_eq!(work.ranking.load(Ordering::SeqCst), 1);
        assert_eq!(work.factions.load(Ordering::SeqCst), 1);
        assert_eq!(work.bans.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_at_fire.lock().unwrap(), vec![3, 3]);
        assert_eq!(running.job_records().get("probe").unwrap().fired, 2);

        let logged = logs.contents();
        let port = running.local_addr().port();
        assert!(logged.contains(&format!("http://localhost:{port}/")), "log was: {logged}");
        assert!(logged.contains("ban table empty"), "one-shot failures are logged");

        running.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_aborts() {
        let occupied = TcpListener::bind(loopback()).await.unwrap();
        let addr = occupied.local_addr().unwrap();
        let work = Arc::new(Computations::default());
        let seq = sequencer(
            addr,
            FakeData::new(None),
            work.clone(),
            MaintenanceScheduler::new(),
            Arc::new(CountingBind::default()),
        );
        let state = seq.state();

        let err = seq.run().await.err().unwrap();

        assert!(matches!(err, StartupError::Bind { addr: a, .. } if a == addr));
        assert_eq!(*state.borrow(), StartupState::Aborted);
        tokio::task::yield_now().await;
        assert_eq!(work.total(), 0);
    }

    #[tokio::test]
    async fn test_running_server_answers_and_stops() {
        let seq = sequencer(
            loopback(),
            FakeData::new(None),
            Arc::new(Computations::default()),
            MaintenanceScheduler::new(),
            Arc::new(CountingBind::default()),
        );
        let running = seq.run().await.unwrap();
        let addr = running.local_addr();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"), "reply was: {reply}");
        assert!(reply.ends_with("OK"));

        running.stop().await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn test_startup_error_keeps_its_sources() {
        let err = StartupError::DataLayer(DataLayerError::Sync {
            model: "users".into(),
            source: "relation exists".into(),
        });
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err)),
            "data layer initialization failed: failed to sync model `users`: relation exists"
        );
        assert_eq!(StartupState::FullyOperational.to_string(), "fully-operational");
    }
}
