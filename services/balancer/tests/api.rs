
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use harness::{free_port, roundtrip, BalancerHandle, TcpEchoBackend};
use serde_json::{json, Value};
use steer_balancer::{api, state::AppState};
use tokio::sync::watch;

#[allow(dead_code)]
struct ApiHandle {
    base: String,
    addr: SocketAddr,
    client: reqwest::Client,
    balancer: BalancerHandle,
    shutdown: watch::Sender<bool>,
}

/// Spin up the full stack: store, prober loop, forwarder, control API.
async fn spawn_api(tag: &str) -> ApiHandle {
    let balancer = BalancerHandle::new(tag);

    let state = AppState::new(
        Arc::clone(&balancer.store),
        Arc::clone(&balancer.stats),
        Arc::clone(&balancer.forwarder),
        Arc::clone(&balancer.prober),
        balancer.events.clone(),
    );
    let app = api::create_router(state, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let prober = Arc::clone(&balancer.prober);
        let forwarder = Arc::clone(&balancer.forwarder);
        async move {
            prober.run(forwarder, shutdown_rx).await;
        }
    });

    ApiHandle {
        base: format!("http://{}", addr),
        addr,
        client: reqwest::Client::builder().no_proxy().build().unwrap(),
        balancer,
        shutdown,
    }
}

impl ApiHandle {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

async fn wait_for<F: Fn(&Value) -> bool>(api: &ApiHandle, path: &str, pred: F) -> Value {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let value = api.get_json(path).await;
        if pred(&value) {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting on {}", path);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn validation_and_error_mapping() {
    let api = spawn_api("api-errors").await;

    // Happy path first.
    let created = api
        .post("/api/add_service", json!({"name": "svc", "listen_port": 6200}))
        .await;
    assert_eq!(created.status(), 200);

    // Duplicate name is a conflict -> 400.
    let dup = api
        .post("/api/add_service", json!({"name": "svc", "listen_port": 6201}))
        .await;
    assert_eq!(dup.status(), 400);

    // Port bounds.
    for port in [0, 65536] {
        let bad = api
            .post(
                "/api/add_server",
                json!({"service": "svc", "ip": "1.2.3.4", "port": port}),
            )
            .await;
        assert_eq!(bad.status(), 400, "port {} must be rejected", port);
    }
    for port in [1, 65535] {
        let ok = api
            .post(
                "/api/add_server",
                json!({"service": "svc", "ip": "1.2.3.4", "port": port}),
            )
            .await;
        assert_eq!(ok.status(), 200, "port {} must be accepted", port);
    }

    // Bad IP.
    let bad_ip = api
        .post(
            "/api/add_server",
            json!({"service": "svc", "ip": "not-an-ip", "port": 80}),
        )
        .await;
    assert_eq!(bad_ip.status(), 400);
    let body: Value = bad_ip.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("not-an-ip"));

    // Bad mode.
    let bad_mode = api
        .post(
            "/api/set_service_mode",
            json!({"service": "svc", "mode": "random"}),
        )
        .await;
    assert_eq!(bad_mode.status(), 400);

    // Unknown service -> 404.
    let missing = api
        .post("/api/remove_service", json!({"name": "missing"}))
        .await;
    assert_eq!(missing.status(), 404);

    // Rename collision -> 400.
    api.post("/api/add_service", json!({"name": "other", "listen_port": 6202}))
        .await;
    let collide = api
        .post(
            "/api/edit_service",
            json!({"name": "other", "new_name": "svc"}),
        )
        .await;
    assert_eq!(collide.status(), 400);
}

#[tokio::test]
async fn listing_reflects_mutations() {
    let api = spawn_api("api-listing").await;

    api.post(
        "/api/add_service",
        json!({"name": "svc", "listen_port": 6300, "mode": "round-robin"}),
    )
    .await;
    api.post(
        "/api/add_server",
        json!({
            "service": "svc",
            "ip": "1.2.3.5",
            "port": 8080,
            "check_type": "http",
            "http_path": "/health"
        }),
    )
    .await;

    let services = api.get_json("/api/list_services").await;
    assert_eq!(services["services"][0]["name"], "svc");
    assert_eq!(services["services"][0]["mode"], "round-robin");

    let servers = api.get_json("/api/list_servers?service=svc").await;
    assert_eq!(servers["servers"][0]["ip"], "1.2.3.5");
    assert_eq!(servers["servers"][0]["check_type"], "http");
    assert_eq!(servers["servers"][0]["http_path"], "/health");

    // Removal drops the backend and its stats key.
    api.post(
        "/api/remove_server",
        json!({"service": "svc", "ip": "1.2.3.5", "port": 8080}),
    )
    .await;
    let servers = api.get_json("/api/list_servers?service=svc").await;
    assert_eq!(servers["servers"].as_array().unwrap().len(), 0);

    let by_server = api.get_json("/api/socat_stats_by_server").await;
    assert!(by_server.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn live_port_edit_moves_the_listener() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let api = spawn_api("api-port-edit").await;

    let old_port = free_port().await;
    let new_port = free_port().await;

    api.post(
        "/api/add_service",
        json!({"name": "A", "listen_port": old_port}),
    )
    .await;
    api.post(
        "/api/add_server",
        json!({
            "service": "A",
            "ip": backend.addr.ip().to_string(),
            "port": backend.addr.port()
        }),
    )
    .await;

    // The prober loop brings the listener up.
    wait_for(&api, "/api/socat_stats", |v| {
        v["A"]["last_active"].is_string()
    })
    .await;
    assert!(roundtrip(old_port, b"before").await.is_ok());

    let edited = api
        .post(
            "/api/edit_service",
            json!({"name": "A", "listen_port": new_port}),
        )
        .await;
    assert_eq!(edited.status(), 200);

    // Within a tick the listener moves to the new port.
    wait_for(&api, "/api/socat_stats", |v| {
        v["A"]["restart_count"].as_u64().unwrap_or(0) >= 2
    })
    .await;
    let reply = roundtrip(new_port, b"after").await.unwrap();
    assert_eq!(reply, b"after");
    assert!(roundtrip(old_port, b"stale").await.is_err());
}

#[tokio::test]
async fn status_and_stats_track_traffic() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let api = spawn_api("api-status").await;

    let port = free_port().await;
    api.post(
        "/api/add_service",
        json!({"name": "A", "listen_port": port}),
    )
    .await;
    api.post(
        "/api/add_server",
        json!({
            "service": "A",
            "ip": backend.addr.ip().to_string(),
            "port": backend.addr.port()
        }),
    )
    .await;

    let status_key = format!("{} (tcp)", backend.addr);
    wait_for(&api, "/api/status", |v| {
        v["services"]["A"][&status_key] == "UP"
    })
    .await;

    let reply = roundtrip(port, b"hello").await.unwrap();
    assert_eq!(reply, b"hello");

    let stats = wait_for(&api, "/api/socat_stats", |v| {
        v["A"]["bytes_out"].as_u64().unwrap_or(0) >= 5
    })
    .await;
    assert_eq!(
        stats["A"]["bytes_total"].as_u64().unwrap(),
        stats["A"]["bytes_in"].as_u64().unwrap() + stats["A"]["bytes_out"].as_u64().unwrap()
    );

    let by_server = api.get_json("/api/socat_stats_by_server").await;
    let key = format!("A:{}", backend.addr);
    assert!(by_server[&key]["bytes_out"].as_u64().unwrap() >= 5);
}

#[tokio::test]
async fn ws_streams_routing_events() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let api = spawn_api("api-ws").await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", api.addr))
        .await
        .unwrap();

    let port = free_port().await;
    api.post(
        "/api/add_service",
        json!({"name": "A", "listen_port": port}),
    )
    .await;
    api.post(
        "/api/add_server",
        json!({
            "service": "A",
            "ip": backend.addr.ip().to_string(),
            "port": backend.addr.port()
        }),
    )
    .await;

    let message = tokio::time::timeout(Duration::from_secs(3), socket.next())
        .await
        .expect("no event before timeout")
        .unwrap()
        .unwrap();

    let text = message.into_text().unwrap();
    assert_eq!(
        text.as_str(),
        format!(
            "Routing traffic on port {} to {} for service 'A' (mode: failover)",
            port, backend.addr
        )
    );
}

#[tokio::test]
async fn persisted_file_matches_api_view() {
    let api = spawn_api("api-persist").await;

    api.post(
        "/api/add_service",
        json!({"name": "svc", "listen_port": 6400, "mode": "round-robin"}),
    )
    .await;
    api.post(
        "/api/add_server",
        json!({"service": "svc", "ip": "10.0.0.1", "port": 9000, "check_type": "smpp"}),
    )
    .await;

    let on_disk: Value = serde_json::from_str(
        &std::fs::read_to_string(api.balancer.data_path()).unwrap(),
    )
    .unwrap();

    let via_api = api.get_json("/api/list_services").await;
    assert_eq!(on_disk["services"], via_api["services"]);
}
