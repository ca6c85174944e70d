//! Server construction.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::{validate_config, ConfigError, ServerConfig};
use crate::discovery::{Discovery, NoopDiscovery};
use crate::error::ServerError;
use crate::health;
use crate::interceptor::{InterceptorChain, StreamInterceptor, UnaryInterceptor};
use crate::lifecycle::LifecycleState;
use crate::server::RpcServer;
use crate::service::ServiceBinder;
use crate::transport::MethodRouter;

/// Collects everything a server is made of. Nothing touches the network
/// until the built server is run.
pub struct ServerBuilder {
    config: ServerConfig,
    methods: MethodRouter,
    unary: Vec<Arc<dyn UnaryInterceptor>>,
    stream: Vec<Arc<dyn StreamInterceptor>>,
    discovery: Arc<dyn Discovery>,
    health: bool,
    binder: Option<ServiceBinder>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            methods: MethodRouter::new(),
            unary: Vec::new(),
            stream: Vec::new(),
            discovery: Arc::new(NoopDiscovery),
            health: false,
            binder: None,
        }
    }

    /// Add RPC methods. May be called repeatedly.
    pub fn methods(mut self, methods: MethodRouter) -> Self {
        self.methods = self.methods.merge(methods);
        self
    }

    /// Append a unary interceptor. Interceptors run in the order they are
    /// added, inside the default error translation, logging and recovery.
    pub fn unary_interceptor<I: UnaryInterceptor>(mut self, interceptor: I) -> Self {
        self.unary.push(Arc::new(interceptor));
        self
    }

    /// Append a streaming interceptor.
    pub fn stream_interceptor<I: StreamInterceptor>(mut self, interceptor: I) -> Self {
        self.stream.push(Arc::new(interceptor));
        self
    }

    /// Append an interceptor that handles both call shapes, such as
    /// `RequestValidation` or `CallTracing`.
    pub fn interceptor<I>(self, interceptor: I) -> Self
    where
        I: UnaryInterceptor + StreamInterceptor + Clone,
    {
        self.unary_interceptor(interceptor.clone())
            .stream_interceptor(interceptor)
    }

    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Serve `grpc.health.v1.Health`, reporting the lifecycle state.
    pub fn with_health_service(mut self) -> Self {
        self.health = true;
        self
    }

    /// Replace the intranet address lookup used for wildcard listen hosts.
    pub fn intranet_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> io::Result<IpAddr> + Send + Sync + 'static,
    {
        let binder = ServiceBinder::new(self.config.address()).with_resolver(resolver);
        self.binder = Some(binder);
        self
    }

    /// Validate the configuration and routes and assemble the server.
    pub fn build(self) -> Result<RpcServer, ServerError> {
        validate_config(&self.config).map_err(|errors| {
            for error in &errors {
                tracing::error!(field = error.field, reason = %error.message, "invalid configuration");
            }
            ServerError::from(ConfigError::Validation(errors))
        })?;

        let (state, _) = watch::channel(LifecycleState::Unbound);

        let methods = self.methods;
        methods.validate()?;
        let services = service_names(&methods.paths());

        let chain = Arc::new(InterceptorChain::with_defaults(self.unary, self.stream));
        tracing::info!(
            address = %self.config.address(),
            methods = methods.len(),
            unary_interceptors = ?chain.unary_names(),
            stream_interceptors = ?chain.stream_names(),
            "rpc server built"
        );

        let mut router = methods.into_router(chain.clone())?;
        let mut health = None;
        if self.health {
            let (mounted, publisher) = health::mount(router, services);
            router = mounted;
            health = Some(publisher);
        }
        let router = router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        let binder = self
            .binder
            .unwrap_or_else(|| ServiceBinder::new(self.config.address()));

        Ok(RpcServer::assemble(
            Arc::new(self.config),
            router,
            chain,
            binder,
            self.discovery,
            health,
            state,
        ))
    }
}

/// `echo.Echo` for every `/echo.Echo/<Method>`, deduplicated.
fn service_names(paths: &[&str]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .filter_map(|path| path.trim_start_matches('/').split_once('/'))
        .map(|(service, _)| service.to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}
