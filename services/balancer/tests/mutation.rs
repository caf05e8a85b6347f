
use harness::{free_port, roundtrip, BalancerHandle, TcpEchoBackend};
use steer_balancer::store::Mode;
use tokio::net::TcpStream;

#[tokio::test]
async fn remove_service_stops_listener_and_purges_stats() {
    let backend = TcpEchoBackend::spawn().await.unwrap();

    let balancer = BalancerHandle::new("remove-service");
    let port = free_port().await;

    balancer.add_service("A", port, Mode::Failover).await;
    balancer.add_backend("A", backend.backend_config()).await;
    balancer.tick().await;

    let reply = roundtrip(port, b"ping").await.unwrap();
    assert_eq!(reply, b"ping");

    balancer.store.remove_service("A").await.unwrap();
    balancer.forwarder.teardown("A").await;
    balancer.stats.remove_service("A").await;

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert!(balancer.stats.service_snapshot().await.is_empty());
    assert!(balancer.stats.backend_snapshot().await.is_empty());
    assert!(balancer.forwarder.runtime_snapshot().await.is_empty());
}

#[tokio::test]
async fn listen_port_change_moves_listener_on_next_tick() {
    let backend = TcpEchoBackend::spawn().await.unwrap();

    let balancer = BalancerHandle::new("port-move");
    let old_port = free_port().await;
    let new_port = free_port().await;

    balancer.add_service("A", old_port, Mode::Failover).await;
    balancer.add_backend("A", backend.backend_config()).await;
    balancer.tick().await;
    assert!(TcpStream::connect(("127.0.0.1", old_port)).await.is_ok());

    balancer
        .store
        .edit_service("A", None, Some(new_port), None)
        .await
        .unwrap();
    balancer.forwarder.invalidate("A").await;

    assert!(TcpStream::connect(("127.0.0.1", old_port)).await.is_err());

    balancer.tick().await;
    let reply = roundtrip(new_port, b"moved").await.unwrap();
    assert_eq!(reply, b"moved");

    let runtime = balancer.forwarder.runtime_snapshot().await;
    assert_eq!(runtime["A"].restart_count, 2);
}

#[tokio::test]
async fn stale_port_listener_is_replaced_even_without_invalidate() {
    let backend = TcpEchoBackend::spawn().await.unwrap();

    let balancer = BalancerHandle::new("stale-port");
    let old_port = free_port().await;
    let new_port = free_port().await;

    balancer.add_service("A", old_port, Mode::Failover).await;
    balancer.add_backend("A", backend.backend_config()).await;
    balancer.tick().await;

    // A port edit that skips the synchronous restart still converges at
    // the next tick, because a listener on a stale port is treated as
    // not running.
    balancer
        .store
        .edit_service("A", None, Some(new_port), None)
        .await
        .unwrap();
    balancer.tick().await;

    assert!(TcpStream::connect(("127.0.0.1", old_port)).await.is_err());
    let reply = roundtrip(new_port, b"converged").await.unwrap();
    assert_eq!(reply, b"converged");
}

#[tokio::test]
async fn service_rename_keeps_runtime_and_stats() {
    let backend = TcpEchoBackend::spawn().await.unwrap();

    let balancer = BalancerHandle::new("rename");
    let port = free_port().await;

    balancer.add_service("old", port, Mode::Failover).await;
    balancer.add_backend("old", backend.backend_config()).await;
    balancer.tick().await;

    let reply = roundtrip(port, b"named").await.unwrap();
    assert_eq!(reply, b"named");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    balancer
        .store
        .edit_service("old", Some("new"), None, None)
        .await
        .unwrap();
    balancer.forwarder.rename("old", "new").await;
    balancer.stats.rename_service("old", "new").await;

    let runtime = balancer.forwarder.runtime_snapshot().await;
    assert!(runtime.contains_key("new"));
    assert!(!runtime.contains_key("old"));
    assert_eq!(runtime["new"].restart_count, 1);

    let services = balancer.stats.service_snapshot().await;
    assert!(services["new"].bytes_out >= 5);
}

#[tokio::test]
async fn config_survives_reload() {
    let balancer = BalancerHandle::new("reload");

    balancer.add_service("A", free_port().await, Mode::Failover).await;
    balancer.add_service("B", free_port().await, Mode::RoundRobin).await;
    balancer
        .add_backend(
            "A",
            steer_balancer::store::BackendConfig {
                ip: "10.1.2.3".parse().unwrap(),
                port: 9000,
                check_type: steer_balancer::store::CheckType::Http,
                http_path: "/health".to_string(),
            },
        )
        .await;

    let reloaded =
        steer_balancer::store::ConfigStore::load(balancer.data_path().to_path_buf()).unwrap();
    assert_eq!(
        reloaded.list_services().await,
        balancer.store.list_services().await
    );
}
