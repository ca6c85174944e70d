//! Method registration and the axum router that serves it.
//!
//! Every RPC method is an axum route on its full path
//! (`/package.Service/Method`). The route runs tonic's gRPC framing with the
//! method's prost codec and one of the adapters, so every call goes through
//! the interceptor chain the server was built with.

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::stream::Stream;
use futures_util::FutureExt;
use tonic::server::Grpc;
use tonic::Status;
use tonic_prost::ProstCodec;

use crate::error::ServerError;
use crate::interceptor::{
    BoxError, CallKind, InterceptorChain, Payload, StreamEndpoint, UnaryEndpoint, Validate,
};
use crate::transport::adapter::{
    BidiStreamingAdapter, ClientStreamingAdapter, Dispatch, ServerStreamingAdapter, UnaryAdapter,
    Wrap,
};
use crate::transport::handler::{
    BidiStreamingHandler, ClientStreamingHandler, RequestStream, ServerStreamingHandler,
    UnaryHandler,
};

type Serve = Arc<
    dyn Fn(Dispatch, http::Request<Body>) -> BoxFuture<'static, http::Response<Body>>
        + Send
        + Sync,
>;

struct Method {
    path: String,
    kind: CallKind,
    serve: Serve,
}

/// Registered RPC methods, keyed by full path.
///
/// Registration never fails; paths are checked when the server is built so
/// that every bad route is reported at once.
#[derive(Default)]
pub struct MethodRouter {
    methods: Vec<Method>,
}

/// Check that `path` looks like `/package.Service/Method`.
pub fn validate_path(path: &str) -> Result<(), ServerError> {
    let invalid = |reason| ServerError::Route {
        path: path.to_string(),
        reason,
    };
    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid("must start with '/'"));
    };
    match rest.split_once('/') {
        Some((service, method))
            if !service.is_empty() && !method.is_empty() && !method.contains('/') =>
        {
            Ok(())
        }
        _ => Err(invalid("must have the form /<service>/<method>")),
    }
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered paths in registration order.
    pub fn paths(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Append every method of `other`.
    pub fn merge(mut self, other: MethodRouter) -> Self {
        self.methods.extend(other.methods);
        self
    }

    /// Register a unary method.
    pub fn unary<Req, Resp, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Default + Send + Sync + 'static,
        Resp: prost::Message + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_unary::<Req, Resp, _>(
            path.into(),
            Payload::new::<Req>,
            UnaryHandler::<Req, F>::new(handler),
        )
    }

    /// Register a unary method whose requests are checked against their
    /// [`Validate`] rules by the validation interceptor.
    pub fn validated_unary<Req, Resp, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Validate + Default + Send + Sync + 'static,
        <Req as Validate>::Context: Default,
        Resp: prost::Message + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_unary::<Req, Resp, _>(
            path.into(),
            Payload::validated::<Req>,
            UnaryHandler::<Req, F>::new(handler),
        )
    }

    /// Register a method answering one request with a stream of responses.
    pub fn server_streaming<Req, Resp, S, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Default + Send + Sync + 'static,
        Resp: prost::Message + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_server_streaming::<Req, Resp, _>(
            path.into(),
            Payload::new::<Req>,
            ServerStreamingHandler::<Req, F>::new(handler),
        )
    }

    /// Server-streaming method whose request is checked by the validation
    /// interceptor.
    pub fn validated_server_streaming<Req, Resp, S, F, Fut, E>(
        self,
        path: impl Into<String>,
        handler: F,
    ) -> Self
    where
        Req: prost::Message + Validate + Default + Send + Sync + 'static,
        <Req as Validate>::Context: Default,
        Resp: prost::Message + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_server_streaming::<Req, Resp, _>(
            path.into(),
            Payload::validated::<Req>,
            ServerStreamingHandler::<Req, F>::new(handler),
        )
    }

    /// Register a method folding a stream of requests into one response.
    pub fn client_streaming<Req, Resp, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Default + Send + Sync + 'static,
        Resp: prost::Message + Send + Sync + 'static,
        F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_client_streaming::<Req, Resp, _>(
            path.into(),
            Payload::new::<Req>,
            ClientStreamingHandler::<Req, F>::new(handler),
        )
    }

    /// Client-streaming method whose every inbound message is checked by the
    /// validation interceptor.
    pub fn validated_client_streaming<Req, Resp, F, Fut, E>(
        self,
        path: impl Into<String>,
        handler: F,
    ) -> Self
    where
        Req: prost::Message + Validate + Default + Send + Sync + 'static,
        <Req as Validate>::Context: Default,
        Resp: prost::Message + Send + Sync + 'static,
        F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_client_streaming::<Req, Resp, _>(
            path.into(),
            Payload::validated::<Req>,
            ClientStreamingHandler::<Req, F>::new(handler),
        )
    }

    /// Register a bidirectional streaming method.
    pub fn streaming<Req, Resp, S, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Default + Send + Sync + 'static,
        Resp: prost::Message + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
        F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_bidi::<Req, Resp, _>(
            path.into(),
            Payload::new::<Req>,
            BidiStreamingHandler::<Req, F>::new(handler),
        )
    }

    /// Bidirectional streaming method whose every inbound message is checked
    /// by the validation interceptor.
    pub fn validated_streaming<Req, Resp, S, F, Fut, E>(self, path: impl Into<String>, handler: F) -> Self
    where
        Req: prost::Message + Validate + Default + Send + Sync + 'static,
        <Req as Validate>::Context: Default,
        Resp: prost::Message + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
        F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_bidi::<Req, Resp, _>(
            path.into(),
            Payload::validated::<Req>,
            BidiStreamingHandler::<Req, F>::new(handler),
        )
    }

    fn add_unary<Req, Resp, H>(self, path: String, wrap: Wrap<Req>, handler: H) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        H: UnaryEndpoint,
    {
        let endpoint: Arc<dyn UnaryEndpoint> = Arc::new(handler);
        self.add(path, CallKind::Unary, move |dispatch, request| {
            let adapter = UnaryAdapter::<Req, Resp> {
                dispatch,
                endpoint: endpoint.clone(),
                wrap,
                _resp: PhantomData,
            };
            async move {
                let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
                grpc.unary(adapter, request).await.map(Body::new)
            }
            .boxed()
        })
    }

    fn add_server_streaming<Req, Resp, H>(self, path: String, wrap: Wrap<Req>, handler: H) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        H: StreamEndpoint,
    {
        let endpoint: Arc<dyn StreamEndpoint> = Arc::new(handler);
        self.add(path, CallKind::ServerStreaming, move |dispatch, request| {
            let adapter = ServerStreamingAdapter::<Req, Resp> {
                dispatch,
                endpoint: endpoint.clone(),
                wrap,
                _resp: PhantomData,
            };
            async move {
                let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
                grpc.server_streaming(adapter, request).await.map(Body::new)
            }
            .boxed()
        })
    }

    fn add_client_streaming<Req, Resp, H>(self, path: String, wrap: Wrap<Req>, handler: H) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        H: StreamEndpoint,
    {
        let endpoint: Arc<dyn StreamEndpoint> = Arc::new(handler);
        self.add(path, CallKind::ClientStreaming, move |dispatch, request| {
            let adapter = ClientStreamingAdapter::<Req, Resp> {
                dispatch,
                endpoint: endpoint.clone(),
                wrap,
                _resp: PhantomData,
            };
            async move {
                let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
                grpc.client_streaming(adapter, request).await.map(Body::new)
            }
            .boxed()
        })
    }

    fn add_bidi<Req, Resp, H>(self, path: String, wrap: Wrap<Req>, handler: H) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        H: StreamEndpoint,
    {
        let endpoint: Arc<dyn StreamEndpoint> = Arc::new(handler);
        self.add(path, CallKind::BidiStreaming, move |dispatch, request| {
            let adapter = BidiStreamingAdapter::<Req, Resp> {
                dispatch,
                endpoint: endpoint.clone(),
                wrap,
                _resp: PhantomData,
            };
            async move {
                let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
                grpc.streaming(adapter, request).await.map(Body::new)
            }
            .boxed()
        })
    }

    fn add<F>(mut self, path: String, kind: CallKind, serve: F) -> Self
    where
        F: Fn(Dispatch, http::Request<Body>) -> BoxFuture<'static, http::Response<Body>>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push(Method {
            path,
            kind,
            serve: Arc::new(serve),
        });
        self
    }

    /// Check every path and reject duplicates.
    pub fn validate(&self) -> Result<(), ServerError> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            validate_path(&method.path)?;
            if !seen.insert(method.path.as_str()) {
                return Err(ServerError::Route {
                    path: method.path.clone(),
                    reason: "registered more than once",
                });
            }
        }
        Ok(())
    }

    /// Build the axum router serving every method through `chain`.
    pub fn into_router(self, chain: Arc<InterceptorChain>) -> Result<Router, ServerError> {
        self.validate()?;

        let mut router = Router::new();
        for method in self.methods {
            let path: Arc<str> = Arc::from(method.path.as_str());
            let kind = method.kind;
            let serve = method.serve;
            let chain = chain.clone();

            tracing::debug!(path = %path, kind = kind.as_str(), "route registered");

            router = router.route_service(
                &method.path,
                tower::service_fn(move |request: http::Request<Body>| {
                    let peer = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| *addr);
                    let dispatch = Dispatch {
                        chain: chain.clone(),
                        path: path.clone(),
                        kind,
                        peer,
                    };
                    let response = serve(dispatch, request);
                    async move { Ok::<_, Infallible>(response.await) }
                }),
            );
        }

        Ok(router.fallback(unknown_method))
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.methods.iter().map(|m| (&m.path, m.kind)))
            .finish()
    }
}

async fn unknown_method(uri: http::Uri) -> http::Response<Body> {
    tracing::debug!(path = %uri.path(), "call to unknown method");
    let mut response = http::Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
    headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(string, tag = "1")]
        name: String,
    }

    async fn echo(ping: Ping) -> Result<Ping, Status> {
        Ok(ping)
    }

    #[test]
    fn accepts_well_formed_paths() {
        assert!(validate_path("/echo.Echo/Say").is_ok());
        assert!(validate_path("/grpc.health.v1.Health/Check").is_ok());
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in ["echo.Echo/Say", "/echo.Echo", "/echo.Echo/", "//Say", "/a/b/c", ""] {
            assert!(
                matches!(validate_path(path), Err(ServerError::Route { .. })),
                "accepted {path:?}"
            );
        }
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let router = MethodRouter::new()
            .unary("/echo.Echo/Say", echo)
            .unary("/echo.Echo/Say", echo);
        let err = router.validate().unwrap_err();
        assert!(err.to_string().contains("registered more than once"));
    }

    #[test]
    fn merge_keeps_registration_order() {
        let a = MethodRouter::new().unary("/a.A/One", echo);
        let b = MethodRouter::new().unary("/b.B/Two", echo);
        let merged = a.merge(b);
        assert_eq!(merged.paths(), vec!["/a.A/One", "/b.B/Two"]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn into_router_reports_bad_routes() {
        let chain = Arc::new(InterceptorChain::with_defaults(Vec::new(), Vec::new()));
        let router = MethodRouter::new().unary("no-slash", echo);
        assert!(router.into_router(chain).is_err());
    }
}
