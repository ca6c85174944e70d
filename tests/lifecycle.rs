//! Lifecycle tests: bind, register, drain and stop against a real socket.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use rpc_shell::discovery::{DiscoveryEvent, InMemoryDiscovery};
use rpc_shell::{LifecycleState, MethodRouter, RpcServer, ServerError, ServiceDescriptor};
use tokio::sync::Notify;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

fn echo_methods() -> MethodRouter {
    MethodRouter::new().unary("/echo.Echo/Say", |request: Ping| async move {
        Ok::<_, Status>(Pong {
            message: request.name,
        })
    })
}

fn server_with(discovery: &Arc<InMemoryDiscovery>) -> RpcServer {
    RpcServer::builder(test_config())
        .methods(echo_methods())
        .discovery(discovery.clone())
        .with_health_service()
        .build()
        .expect("build")
}

async fn health_of(channel: Channel, service: &str) -> Result<i32, Status> {
    HealthClient::new(channel)
        .check(HealthCheckRequest {
            service: service.to_string(),
        })
        .await
        .map(|reply| reply.into_inner().status)
}

async fn health(channel: Channel) -> i32 {
    health_of(channel, "").await.expect("health check")
}

#[tokio::test]
async fn services_register_once_listening_and_unregister_before_stop() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let server = server_with(&discovery);
    server
        .service([
            ServiceDescriptor::with_address("echo", "10.1.0.1:7001"),
            ServiceDescriptor::with_address("echo-admin", "10.1.0.1:7002"),
        ])
        .unwrap();

    let addr = start(&server).await;
    assert_eq!(discovery.instances("echo")[0].address, "10.1.0.1:7001");
    assert_eq!(discovery.instances("echo-admin")[0].address, "10.1.0.1:7002");

    let channel = connect(addr).await;
    assert_eq!(health(channel.clone()).await, ServingStatus::Serving as i32);
    assert_eq!(
        health_of(channel.clone(), "echo.Echo").await.unwrap(),
        ServingStatus::Serving as i32
    );
    let unknown = health_of(channel.clone(), "nope.Nope").await.unwrap_err();
    assert_eq!(unknown.code(), Code::NotFound);

    server.stop();
    wait_for_state(&server, LifecycleState::Draining).await;
    tokio::time::timeout(Duration::from_millis(500), async {
        while !discovery.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unregistered during the grace period");

    // Still accepting calls while draining, but no longer advertised.
    assert_eq!(health(channel.clone()).await, ServingStatus::NotServing as i32);
    assert_eq!(
        health_of(channel, "echo.Echo").await.unwrap(),
        ServingStatus::NotServing as i32
    );

    server.wait().await.expect("clean stop");
    assert_eq!(server.state(), LifecycleState::Stopped);

    let events = discovery.events();
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], DiscoveryEvent::Registered(s) if s.app_id == "echo"));
    assert!(matches!(&events[1], DiscoveryEvent::Registered(s) if s.app_id == "echo-admin"));
    assert!(matches!(&events[2], DiscoveryEvent::Unregistered(s) if s.app_id == "echo"));
    assert!(matches!(&events[3], DiscoveryEvent::Unregistered(s) if s.app_id == "echo-admin"));
}

#[tokio::test]
async fn app_id_alone_is_registered_at_the_listen_address() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let mut config = test_config();
    config.app_id = Some("clock".to_string());
    let server = RpcServer::builder(config)
        .discovery(discovery.clone())
        .build()
        .unwrap();

    start(&server).await;

    let instances = discovery.instances("clock");
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].address, "127.0.0.1:0");

    server.stop();
    server.wait().await.unwrap();
    assert!(discovery.is_empty());
}

#[tokio::test]
async fn registration_failure_is_fatal() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    discovery.fail_register(true);
    let server = server_with(&discovery);
    server
        .service([ServiceDescriptor::with_address("echo", "10.1.0.1:7001")])
        .unwrap();

    let err = server.run().await.unwrap_err();
    assert!(matches!(err, ServerError::Registration { .. }), "{err}");
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert!(discovery.is_empty());
}

#[tokio::test]
async fn unregistration_failure_still_stops_cleanly() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let server = server_with(&discovery);
    server
        .service([ServiceDescriptor::with_address("echo", "10.1.0.1:7001")])
        .unwrap();

    start(&server).await;
    discovery.fail_unregister(true);
    server.stop();

    server.wait().await.expect("unregister failures are not fatal");
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn occupied_address_is_a_bind_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = taken.local_addr().unwrap().to_string();

    let mut config = test_config();
    config.listener.address = address.clone();
    let server = RpcServer::builder(config).build().unwrap();

    match server.run().await {
        Err(ServerError::Bind { address: failed, .. }) => assert_eq!(failed, address),
        other => panic!("expected a bind error, got {other:?}"),
    }
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn stop_before_listening_skips_registration() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let server = server_with(&discovery);
    server
        .service([ServiceDescriptor::with_address("echo", "10.1.0.1:7001")])
        .unwrap();

    server.stop();
    server.run().await.expect("stops cleanly");

    assert!(discovery.events().is_empty());
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn a_server_runs_only_once() {
    let server = RpcServer::builder(test_config()).build().unwrap();
    start(&server).await;

    assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
    assert!(matches!(server.run().await, Err(ServerError::AlreadyStarted)));
    assert!(matches!(
        server.service([ServiceDescriptor::with_address("late", "10.1.0.1:1")]),
        Err(ServerError::ServicesFrozen)
    ));

    server.stop();
    server.wait().await.unwrap();
}

#[tokio::test]
async fn wait_without_start_returns_immediately() {
    let server = RpcServer::builder(test_config()).build().unwrap();
    server.wait().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Unbound);
}

#[tokio::test]
async fn invalid_addresses_fail_at_build() {
    for address in ["", "   ", "localhost"] {
        let mut config = test_config();
        config.listener.address = address.to_string();
        let err = RpcServer::builder(config).build().unwrap_err();
        assert!(matches!(err, ServerError::Config(_)), "{address:?}: {err}");
    }
}

#[tokio::test]
async fn wildcard_services_advertise_the_intranet_address() {
    let mut config = test_config();
    config.listener.address = "0.0.0.0:9000".to_string();
    let server = RpcServer::builder(config)
        .intranet_resolver(|| Ok("10.20.30.40".parse().unwrap()))
        .build()
        .unwrap();

    server
        .service([
            ServiceDescriptor::new("echo"),
            ServiceDescriptor::with_address("pinned", "192.168.1.5:80"),
        ])
        .unwrap();

    let services = server.services();
    assert_eq!(services[0].address, "10.20.30.40:9000");
    assert_eq!(services[1].address, "192.168.1.5:80");
}

#[tokio::test]
async fn every_waiter_sees_the_stop() {
    let server = RpcServer::builder(test_config()).build().unwrap();
    start(&server).await;

    let waiter = |server: RpcServer| tokio::spawn(async move { server.wait().await });
    let first = waiter(server.clone());
    let second = waiter(server.clone());

    assert!(
        tokio::time::timeout(Duration::from_millis(200), server.wait())
            .await
            .is_err(),
        "wait returned while the server was listening"
    );
    assert!(!first.is_finished());
    assert!(!second.is_finished());

    server.stop();
    first.await.unwrap().expect("first waiter");
    second.await.unwrap().expect("second waiter");
    server.wait().await.expect("waiting after the stop");
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn every_waiter_sees_the_same_failure() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.listener.address = taken.local_addr().unwrap().to_string();
    let server = RpcServer::builder(config).build().unwrap();

    server.start().unwrap();
    let other = server.clone();
    let (first, second) = tokio::join!(server.wait(), other.wait());
    assert!(matches!(first, Err(ServerError::Bind { .. })), "{first:?}");
    assert!(matches!(second, Err(ServerError::Bind { .. })), "{second:?}");
}

#[tokio::test]
async fn graceful_stop_waits_for_in_flight_calls() {
    let entered = Arc::new(Notify::new());
    let methods = MethodRouter::new().unary("/echo.Echo/Slow", {
        let entered = entered.clone();
        move |request: Ping| {
            let entered = entered.clone();
            async move {
                entered.notify_one();
                tokio::time::sleep(Duration::from_millis(1800)).await;
                Ok::<_, Status>(Pong {
                    message: request.name,
                })
            }
        }
    });
    let server = RpcServer::builder(test_config()).methods(methods).build().unwrap();
    let channel = connect(start(&server).await).await;

    let call = tokio::spawn(unary::<Ping, Pong>(channel, "/echo.Echo/Slow", ping("late")));
    entered.notified().await;

    let stopping = Instant::now();
    server.stop();
    server.wait().await.expect("clean stop");
    assert!(stopping.elapsed() >= Duration::from_millis(1500), "stopped after {:?}", stopping.elapsed());

    let reply = call.await.unwrap().expect("in-flight call completes");
    assert_eq!(reply.message, "late");
}
