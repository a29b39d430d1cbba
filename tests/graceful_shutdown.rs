//! End-to-end drain: an interrupt or a lost lease while a call is in flight
//! lets the call finish and withdraws the discovery entry before the group
//! ends.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use tonic::service::Routes;

use service_harness::lifecycle::group::EXIT_REGISTRATION_LOST;
use service_harness::lifecycle::{ActorError, RunGroup};
use service_harness::registry::MemoryStore;
use service_harness::rpc::{RpcServer, RpcServerConfig, RpcState};

mod common;
use common::{blocking, http_client, manager, Script, ScriptedActor};

fn slow_routes(delay: Duration) -> Routes {
    let router = axum::Router::new().route(
        "/slow",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "done"
        }),
    );
    Routes::from(router)
}

fn rpc_server(store: &MemoryStore, routes: Routes, drain_timeout: Duration) -> Arc<RpcServer> {
    rpc_server_with_ttl(store, routes, drain_timeout, 5)
}

fn rpc_server_with_ttl(
    store: &MemoryStore,
    routes: Routes,
    drain_timeout: Duration,
    ttl_secs: u64,
) -> Arc<RpcServer> {
    let config = RpcServerConfig {
        service_name: "service/thumbs".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        ttl_secs,
        accept_http1: true,
        drain_timeout,
    };
    Arc::new(RpcServer::new(config, routes, manager(store)))
}

#[tokio::test]
async fn test_interrupt_drains_in_flight_call() {
    let store = MemoryStore::new();
    let server = rpc_server(
        &store,
        slow_routes(Duration::from_millis(500)),
        Duration::from_secs(10),
    );
    let sigint = ScriptedActor::new("signal", Script::WaitForFire);

    let mut group = RunGroup::new();
    group.add(server.clone()).add(sigint.clone());
    let run = tokio::spawn(group.run());

    let addr = tokio::time::timeout(Duration::from_secs(5), server.wait_bound())
        .await
        .unwrap()
        .unwrap();
    let key = format!("service/thumbs/127.0.0.1:{}", addr.port());
    assert!(store.get(&key).is_some());

    let url = format!("http://127.0.0.1:{}/slow", addr.port());
    let call = tokio::spawn(async move { http_client().get(url).send().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    sigint.fire();

    let response = call.await.unwrap().expect("in-flight call must complete");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("group must finish after drain")
        .unwrap();
    assert!(result.is_ok());
    assert!(store.get(&key).is_none());
    assert_eq!(store.revocations(), 1);
    assert_eq!(server.state(), RpcState::Stopped);
}

#[tokio::test]
async fn test_drain_deadline_forces_stop() {
    let store = MemoryStore::new();
    let server = rpc_server(
        &store,
        slow_routes(Duration::from_secs(60)),
        Duration::from_millis(300),
    );
    let sigint = ScriptedActor::new("signal", Script::WaitForFire);

    let mut group = RunGroup::new();
    group.add(server.clone()).add(sigint.clone());
    let run = tokio::spawn(group.run());

    let addr = server.wait_bound().await.unwrap();
    let url = format!("http://127.0.0.1:{}/slow", addr.port());
    let _call = tokio::spawn(async move { http_client().get(url).send().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    sigint.fire();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("hard stop must end the group")
        .unwrap();
    assert!(result.is_ok());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(store.keys().is_empty());
    assert_eq!(server.state(), RpcState::Stopped);
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let store = MemoryStore::new();
    let server = rpc_server(&store, Routes::default(), Duration::from_secs(2));
    let mut states = server.subscribe_state();
    let sigint = ScriptedActor::new("signal", Script::WaitForFire);

    let mut group = RunGroup::new();
    group.add(server.clone()).add(sigint.clone());
    let run = tokio::spawn(group.run());

    states
        .wait_for(|state| *state == RpcState::Serving)
        .await
        .unwrap();
    sigint.fire();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(*states.borrow_and_update(), RpcState::Stopped);
}

#[tokio::test]
async fn test_lost_registration_drains_in_flight_call_then_fails() {
    let store = MemoryStore::new();
    let server = rpc_server_with_ttl(
        &store,
        slow_routes(Duration::from_millis(1500)),
        Duration::from_secs(10),
        1,
    );
    let bystander = blocking("bystander");

    let mut group = RunGroup::new();
    group.add(server.clone()).add(bystander.clone());
    let run = tokio::spawn(group.run());

    let addr = tokio::time::timeout(Duration::from_secs(5), server.wait_bound())
        .await
        .unwrap()
        .unwrap();
    let key = format!("service/thumbs/127.0.0.1:{}", addr.port());
    let url = format!("http://127.0.0.1:{}/slow", addr.port());
    let call = tokio::spawn(async move { http_client().get(url).send().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let lease = server.registry().current().await.unwrap().lease;
    store.sever_keepalive(lease);

    let response = call.await.unwrap().expect("in-flight call must survive the lost lease");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");

    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("group must finish after the drain")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ActorError::RegistrationLost(ref lost) if lost.lease == lease));
    assert_eq!(err.exit_code(), EXIT_REGISTRATION_LOST);
    assert!(store.get(&key).is_none());
    assert_eq!(store.revocations(), 0);
    assert_eq!(bystander.interrupts(), 1);
    assert_eq!(server.state(), RpcState::Stopped);
}
