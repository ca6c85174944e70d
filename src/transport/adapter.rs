//! tonic service adapters.
//!
//! tonic decodes the request with the method's prost codec and hands it to
//! one of these adapters. The adapter erases the message into a
//! [`Payload`], drives the interceptor chain to the handler endpoint, and
//! takes the typed response back out for encoding.

use std::any::Any;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use tonic::server::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService};
use tonic::{Request, Response, Status, Streaming};

use crate::interceptor::{
    CallInfo, CallKind, InterceptorChain, Payload, PayloadStream, StreamCall, StreamEndpoint,
    UnaryCall, UnaryEndpoint,
};
use crate::transport::handler::take;

/// Turns a decoded request into the payload the chain sees.
pub(crate) type Wrap<Req> = fn(Req) -> Payload;

/// Per-call context shared by every adapter kind.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub chain: Arc<InterceptorChain>,
    pub path: Arc<str>,
    pub kind: CallKind,
    pub peer: Option<SocketAddr>,
}

impl Dispatch {
    fn info(&self) -> CallInfo {
        CallInfo::new(self.path.as_ref(), self.kind).with_peer(self.peer)
    }
}

fn typed<Resp: Any>(responses: PayloadStream) -> BoxStream<'static, Result<Resp, Status>> {
    responses
        .map(|item| item.and_then(take::<Resp>))
        .boxed()
}

pub(crate) struct UnaryAdapter<Req, Resp> {
    pub dispatch: Dispatch,
    pub endpoint: Arc<dyn UnaryEndpoint>,
    pub wrap: Wrap<Req>,
    pub _resp: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> UnaryService<Req> for UnaryAdapter<Req, Resp>
where
    Resp: Any + Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<'static, Result<Response<Resp>, Status>>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        let (metadata, _extensions, message) = request.into_parts();
        let call = UnaryCall {
            info: self.dispatch.info(),
            metadata,
            request: (self.wrap)(message),
        };
        let chain = self.dispatch.chain.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let reply = chain.unary(call, endpoint).await?;
            take::<Resp>(reply).map(Response::new)
        }
        .boxed()
    }
}

pub(crate) struct ServerStreamingAdapter<Req, Resp> {
    pub dispatch: Dispatch,
    pub endpoint: Arc<dyn StreamEndpoint>,
    pub wrap: Wrap<Req>,
    pub _resp: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> ServerStreamingService<Req> for ServerStreamingAdapter<Req, Resp>
where
    Resp: Any + Send + 'static,
{
    type Response = Resp;
    type ResponseStream = BoxStream<'static, Result<Resp, Status>>;
    type Future = BoxFuture<'static, Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        let (metadata, _extensions, message) = request.into_parts();
        let first = (self.wrap)(message);
        let call = StreamCall {
            info: self.dispatch.info(),
            metadata,
            requests: stream::once(future::ready(Ok(first))).boxed(),
        };
        let chain = self.dispatch.chain.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let responses = chain.stream(call, endpoint).await?;
            Ok(Response::new(typed::<Resp>(responses)))
        }
        .boxed()
    }
}

pub(crate) struct ClientStreamingAdapter<Req, Resp> {
    pub dispatch: Dispatch,
    pub endpoint: Arc<dyn StreamEndpoint>,
    pub wrap: Wrap<Req>,
    pub _resp: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> ClientStreamingService<Req> for ClientStreamingAdapter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Any + Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<'static, Result<Response<Resp>, Status>>;

    fn call(&mut self, request: Request<Streaming<Req>>) -> Self::Future {
        let (metadata, _extensions, inbound) = request.into_parts();
        let wrap = self.wrap;
        let call = StreamCall {
            info: self.dispatch.info(),
            metadata,
            requests: inbound.map(move |item| item.map(wrap)).boxed(),
        };
        let chain = self.dispatch.chain.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let mut responses = chain.stream(call, endpoint).await?;
            let reply = responses
                .next()
                .await
                .ok_or_else(|| Status::internal("handler finished without a response"))??;
            take::<Resp>(reply).map(Response::new)
        }
        .boxed()
    }
}

pub(crate) struct BidiStreamingAdapter<Req, Resp> {
    pub dispatch: Dispatch,
    pub endpoint: Arc<dyn StreamEndpoint>,
    pub wrap: Wrap<Req>,
    pub _resp: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> StreamingService<Req> for BidiStreamingAdapter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Any + Send + 'static,
{
    type Response = Resp;
    type ResponseStream = BoxStream<'static, Result<Resp, Status>>;
    type Future = BoxFuture<'static, Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Streaming<Req>>) -> Self::Future {
        let (metadata, _extensions, inbound) = request.into_parts();
        let wrap = self.wrap;
        let call = StreamCall {
            info: self.dispatch.info(),
            metadata,
            requests: inbound.map(move |item| item.map(wrap)).boxed(),
        };
        let chain = self.dispatch.chain.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let responses = chain.stream(call, endpoint).await?;
            Ok(Response::new(typed::<Resp>(responses)))
        }
        .boxed()
    }
}
