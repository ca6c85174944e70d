//! The RPC server and its lifecycle controller.
//!
//! # Responsibilities
//! - Hold the immutable configuration, interceptor chain and router
//! - Bind services to advertised addresses before start
//! - Run the lifecycle: bind, accept, register, wait, drain, stop
//!
//! # Design Decisions
//! - Fatal conditions are returned as [`ServerError`]; the process decides
//!   what to do with them
//! - One cancellation primitive ([`Shutdown`]) carries both OS signals and
//!   explicit `stop()` calls
//! - Services are frozen once `run`/`start` begins

pub mod builder;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::discovery::{Discovery, ServiceDescriptor};
use crate::error::ServerError;
use crate::health::HealthPublisher;
use crate::interceptor::InterceptorChain;
use crate::lifecycle::{LifecycleState, Shutdown, TerminationSignals, DRAIN_GRACE};
use crate::observability::metrics;
use crate::service::{default_app_id, ServiceBinder};

pub use builder::ServerBuilder;

type ServeTask = JoinHandle<std::io::Result<()>>;

/// How the lifecycle ended, once it has.
type Outcome = Option<Result<(), ServerError>>;

struct Inner {
    config: Arc<ServerConfig>,
    router: Router,
    chain: Arc<InterceptorChain>,
    binder: ServiceBinder,
    discovery: Arc<dyn Discovery>,
    health: Option<HealthPublisher>,
    services: ArcSwap<Vec<ServiceDescriptor>>,
    started: AtomicBool,
    shutdown: Shutdown,
    state: watch::Sender<LifecycleState>,
    outcome: watch::Sender<Outcome>,
    local_addr: OnceLock<SocketAddr>,
}

/// A configured RPC server. Cloning yields another handle to the same
/// server.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

impl RpcServer {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub(crate) fn assemble(
        config: Arc<ServerConfig>,
        router: Router,
        chain: Arc<InterceptorChain>,
        binder: ServiceBinder,
        discovery: Arc<dyn Discovery>,
        health: Option<HealthPublisher>,
        state: watch::Sender<LifecycleState>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                router,
                chain,
                binder,
                discovery,
                health,
                services: ArcSwap::from_pointee(Vec::new()),
                started: AtomicBool::new(false),
                shutdown: Shutdown::new(),
                state,
                outcome: watch::channel(None).0,
                local_addr: OnceLock::new(),
            }),
        }
    }

    /// Bind services to this server, replacing any bound before.
    ///
    /// Descriptors without an address are advertised at the listen address,
    /// with a wildcard host replaced by the intranet address. They are
    /// registered with discovery once the server listens.
    pub fn service(
        &self,
        services: impl IntoIterator<Item = ServiceDescriptor>,
    ) -> Result<(), ServerError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(ServerError::ServicesFrozen);
        }
        let bound = self.inner.binder.bind(services.into_iter().collect())?;
        for service in &bound {
            tracing::info!(app_id = %service.app_id, address = %service.address, "service bound");
        }
        self.inner.services.store(Arc::new(bound));
        Ok(())
    }

    /// Currently bound services.
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.inner.services.load_full().as_ref().clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.inner.chain
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Follow lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// The bound socket address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Request the draining sequence, as a termination signal would.
    pub fn stop(&self) {
        tracing::info!("stop requested");
        self.inner.shutdown.trigger();
    }

    /// Run the full lifecycle on the calling task, returning once the
    /// server has stopped.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.claim()?;
        self.inner.clone().run_lifecycle().await
    }

    /// Run the lifecycle on a background task. Pair with [`RpcServer::wait`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ServerError> {
        self.claim()?;
        let inner = self.inner.clone();
        let lifecycle = tokio::spawn(inner.clone().run_lifecycle());
        tokio::spawn(async move {
            if let Err(e) = lifecycle.await {
                tracing::error!(error = %e, "rpc server task failed");
                inner.state.send_replace(LifecycleState::Stopped);
                inner.outcome.send_replace(Some(Err(e.into())));
            }
        });
        Ok(())
    }

    /// Wait until the server has stopped and return how the lifecycle
    /// ended. Any number of handles may wait at once; each gets the same
    /// outcome. Returns immediately if the server was never started.
    pub async fn wait(&self) -> Result<(), ServerError> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut outcome = self.inner.outcome.subscribe();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => done.clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };
        result
    }

    fn claim(&self) -> Result<(), ServerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("address", &self.inner.config.address())
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("services", &self.services())
            .finish()
    }
}

impl Inner {
    async fn run_lifecycle(self: Arc<Self>) -> Result<(), ServerError> {
        let result = self.lifecycle().await;
        self.enter(LifecycleState::Stopped).await;
        self.outcome.send_replace(Some(result.clone()));
        result
    }

    /// Publish `state` to the health service, then to state subscribers.
    async fn enter(&self, state: LifecycleState) {
        if let Some(health) = &self.health {
            health.publish(state).await;
        }
        self.state.send_replace(state);
    }

    async fn lifecycle(&self) -> Result<(), ServerError> {
        self.enter(LifecycleState::Unbound).await;

        let address = self.config.address().to_string();
        let bind_error = |address: &str, source: std::io::Error| ServerError::Bind {
            address: address.to_string(),
            source: Arc::new(source),
        };
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| bind_error(&address, e))?;
        let local_addr = listener.local_addr().map_err(|e| bind_error(&address, e))?;
        let _ = self.local_addr.set(local_addr);

        self.synthesize_default_service()?;

        let signal_task = if self.config.listener.handle_signals {
            Some(self.forward_signals()?)
        } else {
            None
        };

        let (stop_accepting, accept_stopped) = oneshot::channel::<()>();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut serve: ServeTask = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = accept_stopped.await;
                })
                .await
        });

        let result = self.serve_until_stopped(local_addr, stop_accepting, &mut serve).await;

        if let Some(task) = signal_task {
            task.abort();
        }
        if result.is_err() {
            serve.abort();
        }
        result
    }

    async fn serve_until_stopped(
        &self,
        local_addr: SocketAddr,
        stop_accepting: oneshot::Sender<()>,
        serve: &mut ServeTask,
    ) -> Result<(), ServerError> {
        let registered = match self.register_all().await {
            Ok(registered) => registered,
            Err((registered, e)) => {
                self.unregister_all(&registered).await;
                return Err(e);
            }
        };

        self.enter(LifecycleState::Listening).await;
        tracing::info!(
            address = %local_addr,
            pid = std::process::id(),
            services = registered.len(),
            "rpc server listening"
        );

        let mut stop = self.shutdown.subscribe();
        tokio::select! {
            _ = stop.recv() => {
                tracing::info!("gracefully shutting down");
            }
            exited = &mut *serve => {
                self.unregister_all(&registered).await;
                return Err(match exited {
                    Ok(Ok(())) => ServerError::ServeExited,
                    Ok(Err(e)) => ServerError::Serve(Arc::new(e)),
                    Err(e) => e.into(),
                });
            }
        }

        self.enter(LifecycleState::Draining).await;
        self.unregister_all(&registered).await;
        tokio::time::sleep(DRAIN_GRACE).await;

        let _ = stop_accepting.send(());
        (&mut *serve)
            .await?
            .map_err(|e| ServerError::Serve(Arc::new(e)))?;

        tracing::info!(address = %local_addr, "rpc server stopped");
        Ok(())
    }

    /// With nothing bound, advertise one instance under the configured or
    /// environment-provided application id, if there is one.
    fn synthesize_default_service(&self) -> Result<(), ServerError> {
        if !self.services.load().is_empty() {
            return Ok(());
        }
        match default_app_id(self.config.app_id.as_deref()) {
            Some(app_id) => {
                let bound = self.binder.bind(vec![ServiceDescriptor::new(app_id)])?;
                for service in &bound {
                    tracing::info!(app_id = %service.app_id, address = %service.address, "service bound from application id");
                }
                self.services.store(Arc::new(bound));
            }
            None => tracing::info!("no application id, running undiscoverable"),
        }
        Ok(())
    }

    fn forward_signals(&self) -> Result<JoinHandle<()>, ServerError> {
        let mut signals =
            TerminationSignals::install().map_err(|e| ServerError::Signal(Arc::new(e)))?;
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            let signal = signals.recv().await;
            tracing::info!(signal = %signal, "termination signal received");
            shutdown.trigger();
        }))
    }

    /// Register every bound service, stopping early once shutdown has been
    /// requested. On failure the already registered ones are returned with
    /// the error so they can be withdrawn.
    async fn register_all(
        &self,
    ) -> Result<Vec<ServiceDescriptor>, (Vec<ServiceDescriptor>, ServerError)> {
        let services = self.services.load_full();
        let mut registered = Vec::with_capacity(services.len());
        for service in services.iter() {
            if self.shutdown.is_triggered() {
                tracing::info!(service = %service, "shutdown requested, skipping registration");
                break;
            }
            if let Err(source) = self.discovery.register(service).await {
                let e = ServerError::Registration {
                    service: service.to_string(),
                    source,
                };
                return Err((registered, e));
            }
            tracing::info!(app_id = %service.app_id, address = %service.address, "service registered");
            registered.push(service.clone());
            metrics::set_registered_services(registered.len());
        }
        Ok(registered)
    }

    /// Best effort: failures are logged and the rest still unregistered.
    async fn unregister_all(&self, registered: &[ServiceDescriptor]) {
        for service in registered {
            match self.discovery.unregister(service).await {
                Ok(()) => {
                    tracing::info!(app_id = %service.app_id, address = %service.address, "service unregistered")
                }
                Err(e) => tracing::warn!(
                    app_id = %service.app_id,
                    address = %service.address,
                    error = %e,
                    "failed to unregister service"
                ),
            }
        }
        metrics::set_registered_services(0);
    }
}
