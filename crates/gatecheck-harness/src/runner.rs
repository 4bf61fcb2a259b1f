// Orchestrates one conformance run: boots the server under test in its own
// execution context, waits until it is observably accepting connections,
// drives every catalog scenario sequentially over loopback, and always
// tears the server context down at the end.

use core::fmt;
use std::panic::AssertUnwindSafe;
use std::thread;
use std::time::Duration;

use derive_more::From;
use futures::future::BoxFuture;
use futures::FutureExt;
use gatecheck_core::types;
use gatecheck_core::Application;
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::dispatch;
use crate::driver::ScenarioClient;
use crate::scenario::Catalog;

const LOOPBACK: &str = "127.0.0.1";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Starts the server implementation under test.
///
/// `serve` must bind the given port, install the application as its
/// per-request callback, and not resolve until shutdown. Resolving early
/// (with or without an error) before the harness has observed readiness is
/// a startup failure.
pub trait ServerFactory: Send + 'static {
    fn serve(self, port: u16, app: Application) -> BoxFuture<'static, types::Result<()>>;
}

impl<F> ServerFactory for F
where
    F: FnOnce(u16, Application) -> BoxFuture<'static, types::Result<()>> + Send + 'static,
{
    fn serve(self, port: u16, app: Application) -> BoxFuture<'static, types::Result<()>> {
        self(port, app)
    }
}

#[derive(Debug, From)]
pub enum HarnessError {
    /// Server under test could not bind or become ready; fatal to the run,
    /// no scenario executes.
    ServerStartup(String),
}

impl std::error::Error for HarnessError {}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::ServerStartup(reason) => write!(f, "server startup failed: {reason}"),
        }
    }
}

/// What one scenario's client routine reported.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub index: usize,
    pub name: &'static str,
    pub failure: Option<String>,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Aggregate result of a full run. One scenario's failure never hides
/// another's; every scenario gets an outcome.
#[derive(Debug)]
pub struct RunReport {
    outcomes: Vec<ScenarioOutcome>,
}

impl RunReport {
    #[must_use]
    pub fn outcomes(&self) -> &[ScenarioOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failure_count() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            match &outcome.failure {
                None => writeln!(f, "ok {} - {}", outcome.index, outcome.name)?,
                Some(reason) => {
                    writeln!(f, "FAILED {} - {}: {reason}", outcome.index, outcome.name)?;
                }
            }
        }
        write!(
            f,
            "{}/{} scenarios passed",
            self.outcomes.len() - self.failure_count(),
            self.outcomes.len()
        )
    }
}

/// Drives a catalog of scenarios against one server implementation.
///
/// The client-facing port may differ from the bind port to let forwarding
/// or proxy-style servers sit in between; when they differ, scenarios that
/// assert on `SERVER_PORT` skip that assertion.
pub struct Harness {
    bind_port: u16,
    client_port: u16,
    ready_timeout: Duration,
    scenario_timeout: Duration,
}

impl Harness {
    #[must_use]
    pub fn new(bind_port: u16, client_port: u16) -> Self {
        Self {
            bind_port,
            client_port,
            ready_timeout: Duration::from_secs(10),
            scenario_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    #[must_use]
    pub fn scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = timeout;
        self
    }

    /// Runs every scenario in catalog order and reports per-scenario
    /// outcomes. Only a startup failure aborts the run.
    pub async fn run<F>(
        &self,
        factory: F,
        catalog: &'static Catalog,
    ) -> Result<RunReport, HarnessError>
    where
        F: ServerFactory,
    {
        let app = dispatch::application(catalog);
        let (cancel_tx, _) = broadcast::channel::<()>(1);
        let (startup_tx, mut startup_rx) = mpsc::unbounded_channel::<types::Result<()>>();

        let server_thread =
            spawn_server_context(factory, self.bind_port, app, startup_tx, &cancel_tx)?;

        if let Err(err) = self.wait_until_accepting(&mut startup_rx).await {
            let _ = cancel_tx.send(());
            drop(server_thread);
            return Err(err);
        }
        tracing::info!(
            "Server under test accepting connections on port {}",
            self.bind_port
        );

        let ports_coincide = self.bind_port == self.client_port;
        let mut outcomes = Vec::with_capacity(catalog.scenario_count());
        for (index, scenario) in catalog.iter().enumerate() {
            let client = ScenarioClient::new(
                LOOPBACK.to_string(),
                self.client_port,
                index,
                ports_coincide,
                self.scenario_timeout,
            );

            let routine = AssertUnwindSafe((scenario.client)(client)).catch_unwind();
            let failure = match tokio::time::timeout(self.scenario_timeout, routine).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(err))) => Some(format!("{err:#}")),
                Ok(Err(payload)) => Some(format!(
                    "scenario panicked: {}",
                    dispatch::panic_text(payload.as_ref())
                )),
                Err(_) => Some(format!(
                    "scenario did not complete within {:?}",
                    self.scenario_timeout
                )),
            };

            if let Some(reason) = &failure {
                tracing::error!("Scenario `{}` failed: {reason}", scenario.name);
            }
            outcomes.push(ScenarioOutcome {
                index,
                name: scenario.name,
                failure,
            });
        }

        // Teardown always happens; a hung server context is left detached
        // after the grace period rather than wedging the harness.
        let _ = cancel_tx.send(());
        let joiner = tokio::task::spawn_blocking(move || {
            let _ = server_thread.join();
        });
        if tokio::time::timeout(SHUTDOWN_GRACE, joiner).await.is_err() {
            tracing::warn!(
                "Server context still winding down after {SHUTDOWN_GRACE:?}; detaching"
            );
        }

        Ok(RunReport { outcomes })
    }

    /// Blocks until a loopback TCP connect to the bind port succeeds.
    ///
    /// The client side is not released before this returns; that ordering
    /// is what keeps the first scenario from flaking on connection-refused.
    async fn wait_until_accepting(
        &self,
        startup: &mut UnboundedReceiver<types::Result<()>>,
    ) -> Result<(), HarnessError> {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            match startup.try_recv() {
                Ok(Ok(())) => {
                    return Err(HarnessError::ServerStartup(
                        "server factory returned before accepting connections".to_string(),
                    ));
                }
                Ok(Err(err)) => {
                    return Err(HarnessError::ServerStartup(format!(
                        "server factory failed during startup: {err}"
                    )));
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(HarnessError::ServerStartup(
                        "server context exited before readiness".to_string(),
                    ));
                }
                Err(TryRecvError::Empty) => {}
            }

            if tokio::net::TcpStream::connect((LOOPBACK, self.bind_port))
                .await
                .is_ok()
            {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::ServerStartup(format!(
                    "port {} not accepting connections within {:?}",
                    self.bind_port, self.ready_timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// Boots the factory on a dedicated thread with its own current-thread
/// runtime. The two contexts share nothing but the cancel channel and the
/// loopback interface.
fn spawn_server_context<F>(
    factory: F,
    bind_port: u16,
    app: Application,
    startup_tx: UnboundedSender<types::Result<()>>,
    cancel_tx: &broadcast::Sender<()>,
) -> Result<thread::JoinHandle<()>, HarnessError>
where
    F: ServerFactory,
{
    let mut cancel_rx = cancel_tx.subscribe();
    thread::Builder::new()
        .name("gatecheck-server".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = startup_tx.send(Err(Box::new(err)));
                    return;
                }
            };

            runtime.block_on(async move {
                let serve = factory.serve(bind_port, app);
                tokio::pin!(serve);
                tokio::select! {
                    biased;

                    result = &mut serve => {
                        let _ = startup_tx.send(result);
                    },
                    _ = cancel_rx.recv() => {
                        tracing::info!("Cancel signal received, shutting down server context");
                    }
                }
            });
        })
        .map_err(|err| HarnessError::ServerStartup(format!("failed to spawn server thread: {err}")))
}
