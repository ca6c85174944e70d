//! Handler closures as chain endpoints.
//!
//! Each registration kind wraps the user's typed closure into a
//! [`UnaryEndpoint`] or [`StreamEndpoint`] that takes the concrete request
//! back out of the [`Payload`] and wraps the response again.

use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream, Stream};
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use tonic::Status;

use crate::interceptor::{
    BoxError, Payload, PayloadStream, StreamCall, StreamEndpoint, StreamResult, UnaryCall,
    UnaryEndpoint, UnaryResult,
};

/// Inbound messages of a client or bidirectional streaming call.
pub type RequestStream<T> = BoxStream<'static, Result<T, Status>>;

pub(crate) fn mismatch<T>(payload: &Payload) -> Status {
    Status::internal(format!(
        "expected {} but the chain produced {}",
        type_name::<T>(),
        payload.type_name()
    ))
}

pub(crate) fn take<T: Any>(payload: Payload) -> Result<T, Status> {
    payload.downcast::<T>().map_err(|p| mismatch::<T>(&p))
}

fn typed_requests<Req: Any + Send>(requests: PayloadStream) -> RequestStream<Req> {
    requests.and_then(|p| future::ready(take::<Req>(p))).boxed()
}

fn erased_responses<Resp, S>(responses: S) -> PayloadStream
where
    Resp: Any + Send + Sync,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    responses.map_ok(Payload::new).boxed()
}

pub(crate) struct UnaryHandler<Req, F> {
    f: F,
    _req: PhantomData<fn(Req)>,
}

impl<Req, F> UnaryHandler<Req, F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f, _req: PhantomData }
    }
}

impl<Req, Resp, F, Fut, E> UnaryEndpoint for UnaryHandler<Req, F>
where
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, call: UnaryCall) -> BoxFuture<'static, UnaryResult> {
        match take::<Req>(call.request) {
            Ok(request) => {
                let reply = (self.f)(request);
                async move { reply.await.map(Payload::new).map_err(Into::into) }.boxed()
            }
            Err(status) => future::ready(Err(status.into())).boxed(),
        }
    }
}

pub(crate) struct ServerStreamingHandler<Req, F> {
    f: Arc<F>,
    _req: PhantomData<fn(Req)>,
}

impl<Req, F> ServerStreamingHandler<Req, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _req: PhantomData,
        }
    }
}

impl<Req, Resp, S, F, Fut, E> StreamEndpoint for ServerStreamingHandler<Req, F>
where
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, call: StreamCall) -> BoxFuture<'static, StreamResult> {
        let f = self.f.clone();
        let mut requests = call.requests;
        async move {
            let first = requests
                .next()
                .await
                .ok_or_else(|| Status::invalid_argument("missing request message"))??;
            let responses = f(take::<Req>(first)?).await.map_err(Into::<BoxError>::into)?;
            Ok::<_, BoxError>(erased_responses(responses))
        }
        .boxed()
    }
}

pub(crate) struct ClientStreamingHandler<Req, F> {
    f: F,
    _req: PhantomData<fn(Req)>,
}

impl<Req, F> ClientStreamingHandler<Req, F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f, _req: PhantomData }
    }
}

impl<Req, Resp, F, Fut, E> StreamEndpoint for ClientStreamingHandler<Req, F>
where
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
    F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, call: StreamCall) -> BoxFuture<'static, StreamResult> {
        let reply = (self.f)(typed_requests(call.requests));
        async move {
            let reply = reply.await.map_err(Into::<BoxError>::into)?;
            let single: PayloadStream = stream::once(future::ready(Ok(Payload::new(reply)))).boxed();
            Ok::<_, BoxError>(single)
        }
        .boxed()
    }
}

pub(crate) struct BidiStreamingHandler<Req, F> {
    f: F,
    _req: PhantomData<fn(Req)>,
}

impl<Req, F> BidiStreamingHandler<Req, F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f, _req: PhantomData }
    }
}

impl<Req, Resp, S, F, Fut, E> StreamEndpoint for BidiStreamingHandler<Req, F>
where
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, call: StreamCall) -> BoxFuture<'static, StreamResult> {
        let responses = (self.f)(typed_requests(call.requests));
        async move {
            let responses = responses.await.map_err(Into::<BoxError>::into)?;
            Ok::<_, BoxError>(erased_responses(responses))
        }
        .boxed()
    }
}
