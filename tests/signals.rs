//! A real termination signal drives the drain sequence.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use rpc_shell::discovery::{DiscoveryEvent, InMemoryDiscovery};
use rpc_shell::{LifecycleState, RpcServer, ServiceDescriptor};

#[tokio::test]
async fn sigterm_unregisters_and_stops_the_server() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let mut config = test_config();
    config.listener.handle_signals = true;
    let server = RpcServer::builder(config)
        .discovery(discovery.clone())
        .build()
        .unwrap();
    server
        .service([ServiceDescriptor::with_address("echo", "10.1.0.1:7001")])
        .unwrap();

    start(&server).await;
    assert_eq!(discovery.instances("echo").len(), 1);

    kill(Pid::this(), Signal::SIGTERM).expect("send SIGTERM");

    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("stopped after SIGTERM")
        .expect("clean stop");
    assert_eq!(server.state(), LifecycleState::Stopped);

    let events = discovery.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], DiscoveryEvent::Registered(s) if s.app_id == "echo"));
    assert!(matches!(&events[1], DiscoveryEvent::Unregistered(s) if s.app_id == "echo"));
}
