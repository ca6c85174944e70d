//! Interceptor traits and chain composition.
//!
//! An interceptor receives the call and a [`UnaryNext`] / [`StreamNext`]
//! handle to the rest of the chain. It may inspect or modify the call,
//! short-circuit it, or delegate with `next.run(call)`. The first
//! interceptor in the chain is the outermost one.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;

use crate::interceptor::call::{
    Payload, PayloadStream, StreamCall, StreamEndpoint, StreamResult, UnaryCall, UnaryEndpoint,
    UnaryResult,
};
use crate::interceptor::error::{into_status, ErrorTranslation};
use crate::interceptor::logging::CallLogging;
use crate::interceptor::recovery::PanicRecovery;

/// Middleware around unary calls.
#[async_trait]
pub trait UnaryInterceptor: Send + Sync + 'static {
    /// Short name used in logs and chain introspection.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult;
}

/// Middleware around streaming calls.
#[async_trait]
pub trait StreamInterceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult;
}

/// The remainder of a unary chain, ending at the handler.
#[derive(Clone)]
pub struct UnaryNext {
    interceptors: Arc<[Arc<dyn UnaryInterceptor>]>,
    position: usize,
    endpoint: Arc<dyn UnaryEndpoint>,
}

impl UnaryNext {
    /// Hand the call to the next interceptor, or to the handler when none
    /// is left.
    pub async fn run(self, call: UnaryCall) -> UnaryResult {
        match self.interceptors.get(self.position).cloned() {
            Some(interceptor) => {
                let next = UnaryNext {
                    position: self.position + 1,
                    ..self
                };
                interceptor.intercept(call, next).await
            }
            None => self.endpoint.call(call).await,
        }
    }
}

/// The remainder of a streaming chain, ending at the handler.
#[derive(Clone)]
pub struct StreamNext {
    interceptors: Arc<[Arc<dyn StreamInterceptor>]>,
    position: usize,
    endpoint: Arc<dyn StreamEndpoint>,
}

impl StreamNext {
    pub async fn run(self, call: StreamCall) -> StreamResult {
        match self.interceptors.get(self.position).cloned() {
            Some(interceptor) => {
                let next = StreamNext {
                    position: self.position + 1,
                    ..self
                };
                interceptor.intercept(call, next).await
            }
            None => self.endpoint.call(call).await,
        }
    }
}

/// Ordered unary and streaming interceptors, fixed at construction.
#[derive(Clone)]
pub struct InterceptorChain {
    unary: Arc<[Arc<dyn UnaryInterceptor>]>,
    stream: Arc<[Arc<dyn StreamInterceptor>]>,
}

impl InterceptorChain {
    /// Defaults first (error translation, logging, recovery), then the
    /// caller's interceptors in declaration order.
    pub fn with_defaults(
        unary: Vec<Arc<dyn UnaryInterceptor>>,
        stream: Vec<Arc<dyn StreamInterceptor>>,
    ) -> Self {
        let default_unary: [Arc<dyn UnaryInterceptor>; 3] = [
            Arc::new(ErrorTranslation),
            Arc::new(CallLogging),
            Arc::new(PanicRecovery),
        ];
        let default_stream: [Arc<dyn StreamInterceptor>; 3] = [
            Arc::new(ErrorTranslation),
            Arc::new(CallLogging),
            Arc::new(PanicRecovery),
        ];
        Self::new(
            default_unary.into_iter().chain(unary).collect(),
            default_stream.into_iter().chain(stream).collect(),
        )
    }

    /// Exactly the given interceptors, nothing prepended.
    pub fn new(
        unary: Vec<Arc<dyn UnaryInterceptor>>,
        stream: Vec<Arc<dyn StreamInterceptor>>,
    ) -> Self {
        Self {
            unary: unary.into(),
            stream: stream.into(),
        }
    }

    /// Unary interceptor names, outermost first.
    pub fn unary_names(&self) -> Vec<&'static str> {
        self.unary.iter().map(|i| i.name()).collect()
    }

    /// Streaming interceptor names, outermost first.
    pub fn stream_names(&self) -> Vec<&'static str> {
        self.stream.iter().map(|i| i.name()).collect()
    }

    /// Drive a unary call through the chain to `endpoint`.
    pub async fn unary(
        &self,
        call: UnaryCall,
        endpoint: Arc<dyn UnaryEndpoint>,
    ) -> Result<Payload, Status> {
        let next = UnaryNext {
            interceptors: self.unary.clone(),
            position: 0,
            endpoint,
        };
        next.run(call).await.map_err(into_status)
    }

    /// Drive a streaming call through the chain to `endpoint`.
    pub async fn stream(
        &self,
        call: StreamCall,
        endpoint: Arc<dyn StreamEndpoint>,
    ) -> Result<PayloadStream, Status> {
        let next = StreamNext {
            interceptors: self.stream.clone(),
            position: 0,
            endpoint,
        };
        next.run(call).await.map_err(into_status)
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("unary", &self.unary_names())
            .field("stream", &self.stream_names())
            .finish()
    }
}

/// A unary interceptor built from a closure.
pub struct UnaryFn<F> {
    name: &'static str,
    f: F,
}

/// Build a unary interceptor from an async closure.
///
/// ```
/// use rpc_shell::interceptor::{unary_fn, UnaryCall, UnaryNext};
///
/// let audit = unary_fn("audit", |call: UnaryCall, next: UnaryNext| async move {
///     tracing::info!(method = %call.info.full_method, "audited");
///     next.run(call).await
/// });
/// # let _ = audit;
/// ```
pub fn unary_fn<F, Fut>(name: &'static str, f: F) -> UnaryFn<F>
where
    F: Fn(UnaryCall, UnaryNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnaryResult> + Send + 'static,
{
    UnaryFn { name, f }
}

#[async_trait]
impl<F, Fut> UnaryInterceptor for UnaryFn<F>
where
    F: Fn(UnaryCall, UnaryNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnaryResult> + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryResult {
        (self.f)(call, next).await
    }
}

/// A streaming interceptor built from a closure.
pub struct StreamFn<F> {
    name: &'static str,
    f: F,
}

/// Build a streaming interceptor from an async closure.
pub fn stream_fn<F, Fut>(name: &'static str, f: F) -> StreamFn<F>
where
    F: Fn(StreamCall, StreamNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult> + Send + 'static,
{
    StreamFn { name, f }
}

#[async_trait]
impl<F, Fut> StreamInterceptor for StreamFn<F>
where
    F: Fn(StreamCall, StreamNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult> + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn intercept(&self, call: StreamCall, next: StreamNext) -> StreamResult {
        (self.f)(call, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::call::{BoxError, CallInfo, CallKind};
    use futures_util::future::BoxFuture;
    use futures_util::{stream, FutureExt, StreamExt};
    use std::sync::Mutex;
    use tonic::Code;

    struct Echo;

    impl UnaryEndpoint for Echo {
        fn call(&self, call: UnaryCall) -> BoxFuture<'static, UnaryResult> {
            async move { Ok(call.request) }.boxed()
        }
    }

    struct Failing;

    impl UnaryEndpoint for Failing {
        fn call(&self, _call: UnaryCall) -> BoxFuture<'static, UnaryResult> {
            async move { Err::<Payload, BoxError>("disk on fire".into()) }.boxed()
        }
    }

    struct Exploding;

    impl UnaryEndpoint for Exploding {
        fn call(&self, _call: UnaryCall) -> BoxFuture<'static, UnaryResult> {
            async move { explode("handler exploded") }.boxed()
        }
    }

    fn explode(message: &str) -> UnaryResult {
        panic!("{message}")
    }

    struct Doubling;

    impl StreamEndpoint for Doubling {
        fn call(&self, call: StreamCall) -> BoxFuture<'static, StreamResult> {
            async move {
                let out: PayloadStream = call
                    .requests
                    .map(|item| item.map(|p| Payload::new(p.downcast::<u32>().unwrap_or(0) * 2)))
                    .boxed();
                Ok(out)
            }
            .boxed()
        }
    }

    fn call(value: &str) -> UnaryCall {
        UnaryCall::new(
            CallInfo::new("/test.Svc/Do", CallKind::Unary),
            Payload::new(value.to_string()),
        )
    }

    fn recorder(
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn UnaryInterceptor> {
        Arc::new(unary_fn(name, move |call, next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name}:enter"));
                let result = next.run(call).await;
                log.lock().unwrap().push(format!("{name}:exit"));
                result
            }
        }))
    }

    #[test]
    fn defaults_precede_user_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::with_defaults(
            vec![recorder("u1", log.clone()), recorder("u2", log)],
            Vec::new(),
        );
        assert_eq!(
            chain.unary_names(),
            vec!["error_translation", "call_logging", "panic_recovery", "u1", "u2"]
        );
        assert_eq!(
            chain.stream_names(),
            vec!["error_translation", "call_logging", "panic_recovery"]
        );
    }

    #[tokio::test]
    async fn user_interceptors_wrap_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::with_defaults(
            vec![recorder("u1", log.clone()), recorder("u2", log.clone())],
            Vec::new(),
        );

        for _ in 0..2 {
            let reply = chain.unary(call("hi"), Arc::new(Echo)).await.unwrap();
            assert_eq!(reply.downcast::<String>().unwrap(), "hi");
        }

        let seen = log.lock().unwrap().clone();
        let once = ["u1:enter", "u2:enter", "u2:exit", "u1:exit"];
        let expected: Vec<&str> = once.iter().chain(once.iter()).copied().collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn interceptor_can_short_circuit() {
        let chain = InterceptorChain::with_defaults(
            vec![Arc::new(unary_fn("deny", |_call, _next| async move {
                Err::<Payload, BoxError>(Status::permission_denied("nope").into())
            }))],
            Vec::new(),
        );
        let status = chain.unary(call("x"), Arc::new(Echo)).await.unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn plain_errors_become_invalid_argument() {
        let chain = InterceptorChain::with_defaults(Vec::new(), Vec::new());
        let status = chain.unary(call("x"), Arc::new(Failing)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "disk on fire");
    }

    #[tokio::test]
    async fn panic_in_handler_becomes_internal_and_chain_survives() {
        let chain = InterceptorChain::with_defaults(Vec::new(), Vec::new());

        let status = chain.unary(call("x"), Arc::new(Exploding)).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("handler exploded"));

        let reply = chain.unary(call("after"), Arc::new(Echo)).await.unwrap();
        assert_eq!(reply.downcast::<String>().unwrap(), "after");
    }

    #[tokio::test]
    async fn panic_in_user_interceptor_is_recovered() {
        let chain = InterceptorChain::with_defaults(
            vec![Arc::new(unary_fn("boom", |_call, _next| async move {
                explode("interceptor exploded")
            }))],
            Vec::new(),
        );
        let status = chain.unary(call("x"), Arc::new(Echo)).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn stream_chain_reaches_endpoint() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let chain = InterceptorChain::with_defaults(
            Vec::new(),
            vec![Arc::new(stream_fn("s1", move |call, next| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(call.info.full_method.clone());
                    next.run(call).await
                }
            }))],
        );

        let requests: PayloadStream =
            stream::iter(vec![Ok(Payload::new(1u32)), Ok(Payload::new(4u32))]).boxed();
        let call = StreamCall::new(CallInfo::new("/test.Svc/Double", CallKind::BidiStreaming), requests);
        let replies: Vec<u32> = chain
            .stream(call, Arc::new(Doubling))
            .await
            .unwrap()
            .map(|item| item.unwrap().downcast::<u32>().unwrap())
            .collect()
            .await;

        assert_eq!(replies, vec![2, 8]);
        assert_eq!(*order.lock().unwrap(), vec!["/test.Svc/Double".to_string()]);
    }
}
