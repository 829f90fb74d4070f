//! Router tests over real WebSocket connections

use serde_json::json;
use spacebrew_core::{AdminEvent, ServerMessage};
use spacebrew_router::RouterConfig;
use spacebrew_test_utils::{TestConnection, TestRouter};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn config(name: &str, publish: serde_json::Value, subscribe: serde_json::Value) -> serde_json::Value {
    json!({"config": {
        "name": name,
        "description": format!("{} test client", name),
        "publish": {"messages": publish},
        "subscribe": {"messages": subscribe}
    }})
}

fn local(client: &str, channel: &str, channel_type: &str) -> serde_json::Value {
    json!({"clientName": client, "remoteAddress": "127.0.0.1", "name": channel, "type": channel_type})
}

async fn admin(router: &TestRouter) -> TestConnection {
    let conn = router.connect_raw().await;
    conn.send_json(json!({"admin": true, "no_msgs": true})).await;
    conn
}

#[tokio::test]
async fn test_route_delivery_over_websocket() {
    let router = TestRouter::start().await;

    let button = router.connect_raw().await;
    button
        .send_json(config("button", json!([{"name": "press", "type": "boolean", "default": "false"}]), json!([])))
        .await;
    let mut lamp = router.connect_raw().await;
    lamp.send_json(config("lamp", json!([]), json!([{"name": "on", "type": "boolean"}])))
        .await;
    assert!(router.wait_for_clients(2).await);

    let mut control = admin(&router).await;
    control
        .send_json(json!({"route": {
            "type": "add",
            "publisher": local("button", "press", "boolean"),
            "subscriber": local("lamp", "on", "boolean")
        }}))
        .await;
    assert!(router.wait_for_routes(1).await);

    button
        .send_json(json!({"message": {"clientName": "button", "name": "press", "type": "boolean", "value": "true"}}))
        .await;

    let received = lamp.recv_json(WAIT).await.expect("lamp received nothing");
    assert_eq!(
        received,
        json!({"message": {"name": "on", "type": "boolean", "value": "true"}})
    );

    // The admin sees the route echo but no data, having registered with no_msgs
    let echoed = control
        .recv_until(WAIT, |frame| frame.get("route").is_some())
        .await
        .expect("no route event");
    assert_eq!(echoed["route"]["type"], "add");
    assert!(control.expect_silence(QUIET).await);
}

#[tokio::test]
async fn test_admin_receives_registry_events() {
    let router = TestRouter::start().await;
    let mut control = admin(&router).await;

    let slider = router.connect_raw().await;
    slider
        .send_json(config("slider", json!([{"name": "level", "type": "range"}]), json!([])))
        .await;

    match control.recv_server(WAIT).await {
        Some(ServerMessage::Admin(AdminEvent::Clients(clients))) => {
            assert_eq!(clients.len(), 1);
            assert_eq!(clients[0].name, "slider");
            assert_eq!(clients[0].remote_address, "127.0.0.1");
            assert_eq!(clients[0].publish.messages[0].name, "level");
        }
        other => panic!("expected a client event, got {:?}", other),
    }

    slider.close().await;

    match control.recv_server(WAIT).await {
        Some(ServerMessage::Admin(AdminEvent::Removed(removed))) => {
            assert_eq!(removed.len(), 1);
            assert_eq!(removed[0].name, "slider");
        }
        other => panic!("expected a remove event, got {:?}", other),
    }
    assert!(router.wait_for_clients(0).await);
}

#[tokio::test]
async fn test_late_admin_gets_snapshot() {
    let router = TestRouter::start().await;

    let a = router.connect_raw().await;
    a.send_json(config("a", json!([{"name": "out", "type": "string"}]), json!([])))
        .await;
    let b = router.connect_raw().await;
    b.send_json(config("b", json!([]), json!([{"name": "in", "type": "string"}])))
        .await;
    assert!(router.wait_for_clients(2).await);

    let first = admin(&router).await;
    first
        .send_json(json!({"route": {
            "type": "add",
            "publisher": local("a", "out", "string"),
            "subscriber": local("b", "in", "string")
        }}))
        .await;
    assert!(router.wait_for_routes(1).await);

    let mut late = admin(&router).await;
    let snapshot = late.recv_json(WAIT).await.expect("no snapshot");
    let names: Vec<_> = snapshot
        .as_array()
        .expect("snapshot should be an array")
        .iter()
        .map(|entry| entry["config"]["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    let route = late.recv_json(WAIT).await.expect("no route in snapshot");
    assert_eq!(route["route"]["publisher"]["name"], "out");
    assert_eq!(route["route"]["subscriber"]["clientName"], "b");
}

#[tokio::test]
async fn test_subscriber_disconnect_cascades() {
    let router = TestRouter::start().await;

    let a = router.connect_raw().await;
    a.send_json(config("a", json!([{"name": "out", "type": "range"}]), json!([])))
        .await;
    let b = router.connect_raw().await;
    b.send_json(config("b", json!([]), json!([{"name": "in", "type": "range"}])))
        .await;
    assert!(router.wait_for_clients(2).await);

    let mut control = admin(&router).await;
    control
        .send_json(json!({"route": {
            "type": "add",
            "publisher": local("a", "out", "range"),
            "subscriber": local("b", "in", "range")
        }}))
        .await;
    assert!(router.wait_for_routes(1).await);

    b.close().await;
    assert!(router.wait_for_routes(0).await);

    let removal = control
        .recv_until(WAIT, |frame| frame["route"]["type"] == "remove")
        .await;
    assert!(removal.is_some());
    let gone = control.recv_until(WAIT, |frame| frame.get("remove").is_some()).await;
    assert_eq!(gone.expect("no remove event")["remove"][0]["name"], "b");

    // Still accepted, just routed nowhere
    a.send_json(json!({"message": {"name": "out", "type": "range", "value": 7}}))
        .await;
    assert_eq!(router.core().registry().len(), 1);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let router = TestRouter::start().await;
    let conn = router.connect_raw().await;

    conn.send_json(json!({"hello": "world"})).await;
    conn.send_json(json!({"config": {"name": "", "publish": {"messages": []}, "subscribe": {"messages": []}}}))
        .await;
    conn.send_json(config("survivor", json!([]), json!([]))).await;

    assert!(router.wait_for_clients(1).await);
    assert!(router.core().registry().find("survivor", "127.0.0.1").is_some());
}

#[tokio::test]
async fn test_non_admin_route_command_is_ignored() {
    let router = TestRouter::start().await;

    let a = router.connect_raw().await;
    a.send_json(config("a", json!([{"name": "out", "type": "boolean"}]), json!([{"name": "in", "type": "boolean"}])))
        .await;
    assert!(router.wait_for_clients(1).await);

    a.send_json(json!({"route": {
        "type": "add",
        "publisher": local("a", "out", "boolean"),
        "subscriber": local("a", "in", "boolean")
    }}))
    .await;
    tokio::time::sleep(QUIET).await;

    assert!(router.core().routes().is_empty());
}

#[tokio::test]
async fn test_idle_socket_does_not_block_other_clients() {
    let router = TestRouter::start().await;

    // Opens TCP but never sends the upgrade request
    let _idle = tokio::net::TcpStream::connect(("127.0.0.1", router.port()))
        .await
        .expect("tcp connect failed");

    let conn = tokio::time::timeout(Duration::from_secs(3), TestConnection::connect(&router.url()))
        .await
        .expect("connection stalled behind the idle socket");
    conn.send_json(config("prompt", json!([]), json!([]))).await;
    assert!(router.wait_for_clients(1).await);
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_connections() {
    let router = TestRouter::start_with_config(RouterConfig {
        max_connections: 1,
        ..Default::default()
    })
    .await;

    let first = router.connect_raw().await;
    first.send_json(config("first", json!([]), json!([]))).await;
    assert!(router.wait_for_clients(1).await);

    // The handshake completes, then the router closes the socket
    let mut second = router.connect_raw().await;
    assert!(second.recv_json(WAIT).await.is_none());

    assert_eq!(router.core().session_count(), 1);
    assert_eq!(router.core().registry().len(), 1);
}
