//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::Stream;
use http::uri::PathAndQuery;
use rpc_shell::{LifecycleState, RpcServer, ServerConfig};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tonic_prost::ProstCodec;

#[derive(Clone, PartialEq, prost::Message, garde::Validate)]
pub struct Ping {
    #[prost(string, tag = "1")]
    #[garde(length(min = 1))]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Pong {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Count {
    #[prost(uint32, tag = "1")]
    pub n: u32,
}

pub fn ping(name: &str) -> Ping {
    Ping {
        name: name.to_string(),
    }
}

/// Loopback config on an ephemeral port that leaves process signals alone.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::with_address("127.0.0.1:0");
    config.listener.handle_signals = false;
    config
}

/// Wait until the server reaches `state`.
pub async fn wait_for_state(server: &RpcServer, state: LifecycleState) {
    let mut states = server.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("server never reached {state}"))
        .expect("state channel open");
}

/// Start the server in the background and return its bound address.
pub async fn start(server: &RpcServer) -> SocketAddr {
    server.start().expect("start");
    wait_for_state(server, LifecycleState::Listening).await;
    server.local_addr().expect("listening")
}

pub async fn connect(addr: SocketAddr) -> Channel {
    Endpoint::from_shared(format!("http://{addr}"))
        .expect("endpoint")
        .connect()
        .await
        .expect("connect")
}

async fn ready(channel: Channel) -> Result<tonic::client::Grpc<Channel>, Status> {
    let mut client = tonic::client::Grpc::new(channel);
    client
        .ready()
        .await
        .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
    Ok(client)
}

pub async fn unary<Req, Resp>(channel: Channel, path: &'static str, request: Req) -> Result<Resp, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut client = ready(channel).await?;
    client
        .unary(
            Request::new(request),
            PathAndQuery::from_static(path),
            ProstCodec::<Req, Resp>::default(),
        )
        .await
        .map(|response| response.into_inner())
}

pub async fn server_streaming<Req, Resp>(
    channel: Channel,
    path: &'static str,
    request: Req,
) -> Result<Streaming<Resp>, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut client = ready(channel).await?;
    client
        .server_streaming(
            Request::new(request),
            PathAndQuery::from_static(path),
            ProstCodec::<Req, Resp>::default(),
        )
        .await
        .map(|response| response.into_inner())
}

pub async fn client_streaming<Req, Resp, S>(
    channel: Channel,
    path: &'static str,
    requests: S,
) -> Result<Resp, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
    S: Stream<Item = Req> + Send + 'static,
{
    let mut client = ready(channel).await?;
    client
        .client_streaming(
            Request::new(requests),
            PathAndQuery::from_static(path),
            ProstCodec::<Req, Resp>::default(),
        )
        .await
        .map(|response| response.into_inner())
}

pub async fn streaming<Req, Resp, S>(
    channel: Channel,
    path: &'static str,
    requests: S,
) -> Result<Streaming<Resp>, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
    S: Stream<Item = Req> + Send + 'static,
{
    let mut client = ready(channel).await?;
    client
        .streaming(
            Request::new(requests),
            PathAndQuery::from_static(path),
            ProstCodec::<Req, Resp>::default(),
        )
        .await
        .map(|response| response.into_inner())
}
