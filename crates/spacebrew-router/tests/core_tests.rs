//! In-process tests for the router core
//!
//! Sessions are backed by `RecordingSender`, so every frame the router emits
//! can be inspected without a network.

use serde_json::json;
use spacebrew_core::DataMessage;
use spacebrew_router::{ConnectionState, RouterConfig, RouterCore, RouterError, Session};
use spacebrew_test_utils::{peer, RecordingSender};
use std::sync::Arc;
use std::time::Duration;

fn open(core: &RouterCore, ip: &str) -> (Arc<Session>, Arc<RecordingSender>) {
    let sender = RecordingSender::new();
    let session = core.open(sender.clone(), peer(ip, 50000)).unwrap();
    (session, sender)
}

fn send(core: &RouterCore, session: &Arc<Session>, value: serde_json::Value) -> Result<(), RouterError> {
    core.handle_frame(session, &serde_json::to_vec(&value).unwrap())
}

fn publisher_config(name: &str, channel: &str, channel_type: &str) -> serde_json::Value {
    json!({"config": {
        "name": name,
        "description": "",
        "publish": {"messages": [{"name": channel, "type": channel_type}]},
        "subscribe": {"messages": []}
    }})
}

fn subscriber_config(name: &str, channel: &str, channel_type: &str) -> serde_json::Value {
    json!({"config": {
        "name": name,
        "description": "",
        "publish": {"messages": []},
        "subscribe": {"messages": [{"name": channel, "type": channel_type}]}
    }})
}

fn endpoint(client: &str, addr: &str, channel: &str, channel_type: &str) -> serde_json::Value {
    json!({"clientName": client, "remoteAddress": addr, "name": channel, "type": channel_type})
}

fn route(action: &str, publisher: serde_json::Value, subscriber: serde_json::Value) -> serde_json::Value {
    json!({"route": {"type": action, "publisher": publisher, "subscriber": subscriber}})
}

fn admin(core: &RouterCore, ip: &str) -> (Arc<Session>, Arc<RecordingSender>) {
    let (session, sender) = open(core, ip);
    send(core, &session, json!({"admin": true, "no_msgs": true})).unwrap();
    (session, sender)
}

fn admin_observer(core: &RouterCore) -> (Arc<Session>, Arc<RecordingSender>) {
    admin(core, "10.0.0.8")
}

/// Registers A (publishes `btn`) and B (subscribes `lamp`)
fn button_and_lamp(core: &RouterCore) -> [(Arc<Session>, Arc<RecordingSender>); 2] {
    let (a, a_frames) = open(core, "10.0.0.1");
    let (b, b_frames) = open(core, "10.0.0.2");
    send(core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    [(a, a_frames), (b, b_frames)]
}

fn btn_to_lamp() -> serde_json::Value {
    route(
        "add",
        endpoint("A", "10.0.0.1", "btn", "boolean"),
        endpoint("B", "10.0.0.2", "lamp", "boolean"),
    )
}

#[test]
fn test_register_then_find() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    assert_eq!(a.state(), ConnectionState::AwaitingConfig);

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();

    assert_eq!(a.state(), ConnectionState::Active);
    let client = core.registry().find("A", "10.0.0.1").unwrap();
    assert_eq!(client.publish.len(), 1);
    assert_eq!(client.publish[0].name, "btn");
    assert!(client.subscribe.is_empty());
}

#[test]
fn test_invalid_config_leaves_connection_unregistered() {
    let core = RouterCore::new(RouterConfig::default());
    let (_admin, admin_frames) = admin(&core, "10.0.0.9");
    let (a, _) = open(&core, "10.0.0.1");

    let result = send(&core, &a, json!({"config": {"name": "A", "publish": {"messages": []}}}));

    assert!(matches!(result, Err(RouterError::InvalidConfig(_))));
    assert!(core.registry().is_empty());
    assert_eq!(a.state(), ConnectionState::AwaitingConfig);
    assert!(admin_frames.is_empty());
}

#[test]
fn test_button_drives_lamp() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    let (b, b_frames) = open(&core, "10.0.0.2");
    let (admin, _) = admin(&core, "10.0.0.9");

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(&core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    send(&core, &admin, btn_to_lamp()).unwrap();

    send(
        &core,
        &a,
        json!({"message": {"clientName": "A", "name": "btn", "type": "boolean", "value": "true"}}),
    )
    .unwrap();

    assert_eq!(
        b_frames.json(),
        vec![json!({"message": {"name": "lamp", "type": "boolean", "value": "true"}})]
    );
}

#[test]
fn test_fan_out_reaches_only_routed_subscribers() {
    let core = RouterCore::new(RouterConfig::default());
    let (p, _) = open(&core, "10.0.0.1");
    let (s1, s1_frames) = open(&core, "10.0.0.2");
    let (s2, s2_frames) = open(&core, "10.0.0.3");
    let (s3, s3_frames) = open(&core, "10.0.0.4");
    let (admin, _) = admin(&core, "10.0.0.9");

    send(&core, &p, publisher_config("P", "x", "range")).unwrap();
    send(&core, &s1, subscriber_config("S1", "in1", "range")).unwrap();
    send(&core, &s2, subscriber_config("S2", "in2", "range")).unwrap();
    send(&core, &s3, subscriber_config("S3", "in3", "range")).unwrap();

    let x = endpoint("P", "10.0.0.1", "x", "range");
    send(&core, &admin, route("add", x.clone(), endpoint("S1", "10.0.0.2", "in1", "range"))).unwrap();
    send(&core, &admin, route("add", x, endpoint("S2", "10.0.0.3", "in2", "range"))).unwrap();

    let sender = core.registry().find("P", "10.0.0.1").unwrap();
    let report = core
        .dispatch(&sender, &DataMessage::new("x", "range", 512))
        .unwrap();
    assert_eq!(report.routes, 2);
    assert_eq!(report.delivered, 2);

    assert_eq!(s1_frames.json()[0]["message"]["name"], "in1");
    assert_eq!(s1_frames.json()[0]["message"]["value"], 512);
    assert_eq!(s2_frames.json()[0]["message"]["name"], "in2");
    assert!(s3_frames.is_empty());
}

#[test]
fn test_type_mismatch_route_rejected() {
    let core = RouterCore::new(RouterConfig::default());
    let _clients = button_and_lamp(&core);
    let (admin, _) = admin(&core, "10.0.0.9");
    let (_observer, observer_frames) = admin_observer(&core);

    let result = send(
        &core,
        &admin,
        route(
            "add",
            endpoint("A", "10.0.0.1", "btn", "boolean"),
            endpoint("B", "10.0.0.2", "lamp", "range"),
        ),
    );

    assert!(matches!(result, Err(RouterError::TypeMismatch { .. })));
    assert!(core.routes().is_empty());
    assert!(observer_frames.is_empty());
}

#[test]
fn test_duplicate_route_add_is_silent() {
    let core = RouterCore::new(RouterConfig::default());
    let _clients = button_and_lamp(&core);
    let (admin, _) = admin(&core, "10.0.0.9");
    let (_observer, observer_frames) = admin_observer(&core);

    send(&core, &admin, btn_to_lamp()).unwrap();
    send(&core, &admin, btn_to_lamp()).unwrap();

    assert_eq!(core.routes().len(), 1);
    let events = observer_frames.json();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["route"]["type"], "add");
}

#[test]
fn test_remove_unknown_route_is_noop() {
    let core = RouterCore::new(RouterConfig::default());
    let _clients = button_and_lamp(&core);
    let (admin, _) = admin(&core, "10.0.0.9");
    send(&core, &admin, btn_to_lamp()).unwrap();
    let (_observer, observer_frames) = admin_observer(&core);
    observer_frames.clear();

    let result = send(
        &core,
        &admin,
        route(
            "remove",
            endpoint("A", "10.0.0.1", "btn", "boolean"),
            endpoint("C", "10.0.0.3", "other", "boolean"),
        ),
    );

    assert!(matches!(result, Err(RouterError::NotFound(_))));
    assert!(result.unwrap_err().is_expected());
    assert_eq!(core.routes().len(), 1);
    assert!(observer_frames.is_empty());
}

#[test]
fn test_route_to_absent_client_is_rejected() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    let (admin, _) = admin(&core, "10.0.0.9");
    let (_observer, observer_frames) = admin_observer(&core);

    let result = send(&core, &admin, btn_to_lamp());
    assert!(matches!(result, Err(RouterError::NotFound(_))));
    assert!(core.routes().is_empty());
    assert!(observer_frames.is_empty());

    // B showing up later does not inherit a route nobody made
    let (b, b_frames) = open(&core, "10.0.0.2");
    send(&core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    send(&core, &a, json!({"message": {"name": "btn", "type": "boolean", "value": "true"}})).unwrap();
    assert!(b_frames.is_empty());
}

#[test]
fn test_route_to_departed_client_is_rejected() {
    let core = RouterCore::new(RouterConfig::default());
    let [_a, (b, _)] = button_and_lamp(&core);
    let (admin, _) = admin(&core, "10.0.0.9");

    core.close(&b);
    let result = send(&core, &admin, btn_to_lamp());

    assert!(matches!(result, Err(RouterError::NotFound(_))));
    assert!(core.routes().is_empty());
}

#[test]
fn test_route_commands_require_admin() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();

    let result = send(&core, &a, btn_to_lamp());
    assert!(matches!(result, Err(RouterError::NotAdmin)));
    assert!(core.routes().is_empty());
}

#[test]
fn test_disconnect_cascades_routes_and_notifies() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    let (b, _) = open(&core, "10.0.0.2");
    let (admin, admin_frames) = admin(&core, "10.0.0.9");

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(&core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    send(&core, &admin, btn_to_lamp()).unwrap();
    admin_frames.clear();

    core.close(&b);
    core.close(&b);

    assert!(core.routes().is_empty());
    assert!(core.registry().find("B", "10.0.0.2").is_none());
    assert_eq!(b.state(), ConnectionState::Closed);

    let events = admin_frames.json();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["route"]["type"], "remove");
    assert_eq!(events[1], json!({"remove": [{"name": "B", "remoteAddress": "10.0.0.2"}]}));

    // The former publisher keeps sending into the void
    let sender = core.registry().find("A", "10.0.0.1").unwrap();
    let report = core
        .dispatch(&sender, &DataMessage::new("btn", "boolean", "true"))
        .unwrap();
    assert_eq!(report.routes, 0);
    assert_eq!(report.delivered, 0);
}

#[test]
fn test_undeclared_channel_is_dropped() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();

    let wrong_name = send(&core, &a, json!({"message": {"name": "nope", "type": "boolean", "value": "true"}}));
    let wrong_type = send(&core, &a, json!({"message": {"name": "btn", "type": "range", "value": 3}}));

    assert!(matches!(wrong_name, Err(RouterError::UnknownChannel { .. })));
    assert!(matches!(wrong_type, Err(RouterError::UnknownChannel { .. })));
}

#[test]
fn test_data_before_config_is_rejected() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");

    let result = send(&core, &a, json!({"message": {"name": "btn", "type": "boolean", "value": "true"}}));
    assert!(matches!(result, Err(RouterError::NotRegistered)));
}

#[test]
fn test_admin_snapshot_on_registration() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    let (b, _) = open(&core, "10.0.0.2");
    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(&core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    let (first_admin, _) = admin(&core, "10.0.0.9");
    send(&core, &first_admin, btn_to_lamp()).unwrap();

    let (_late, late_frames) = admin(&core, "10.0.0.8");

    let frames = late_frames.json();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0][0]["config"]["name"], "A");
    assert_eq!(frames[0][0]["config"]["remoteAddress"], "10.0.0.1");
    assert_eq!(frames[0][1]["config"]["name"], "B");
    assert_eq!(frames[1]["route"]["type"], "add");
    assert_eq!(frames[1]["route"]["subscriber"]["name"], "lamp");
}

#[test]
fn test_monitor_copies_respect_no_msgs() {
    let core = RouterCore::new(RouterConfig::default());
    let (quiet, quiet_frames) = open(&core, "10.0.0.8");
    let (watcher, watcher_frames) = open(&core, "10.0.0.9");
    send(&core, &quiet, json!({"admin": true, "no_msgs": true})).unwrap();
    send(&core, &watcher, json!({"admin": true, "no_msgs": false})).unwrap();

    let (a, _) = open(&core, "10.0.0.1");
    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    quiet_frames.clear();
    watcher_frames.clear();

    send(&core, &a, json!({"message": {"name": "btn", "type": "boolean", "value": "false"}})).unwrap();

    assert!(quiet_frames.is_empty());
    assert_eq!(
        watcher_frames.json(),
        vec![json!({"message": {
            "clientName": "A",
            "name": "btn",
            "type": "boolean",
            "value": "false",
            "remoteAddress": "10.0.0.1"
        }})]
    );
}

#[test]
fn test_config_update_replaces_channels() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    let (_admin, admin_frames) = admin(&core, "10.0.0.9");

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(&core, &a, publisher_config("A", "knob", "range")).unwrap();

    let client = core.registry().find("A", "10.0.0.1").unwrap();
    assert!(client.publish_channel("btn").is_none());
    assert!(client.publish_channel("knob").is_some());
    assert_eq!(core.registry().len(), 1);

    // One config event per registration
    let frames = admin_frames.json();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1][0]["config"]["publish"]["messages"][0]["name"], "knob");
}

#[test]
fn test_rename_removes_previous_identity() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    let (b, _) = open(&core, "10.0.0.2");
    let (admin, admin_frames) = admin(&core, "10.0.0.9");

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    send(&core, &b, subscriber_config("B", "lamp", "boolean")).unwrap();
    send(&core, &admin, btn_to_lamp()).unwrap();
    admin_frames.clear();

    send(&core, &a, publisher_config("A2", "btn", "boolean")).unwrap();

    assert!(core.registry().find("A", "10.0.0.1").is_none());
    assert!(core.registry().find("A2", "10.0.0.1").is_some());
    assert!(core.routes().is_empty());

    let frames = admin_frames.json();
    assert_eq!(frames[0]["route"]["type"], "remove");
    assert_eq!(frames[1]["remove"][0]["name"], "A");
    assert_eq!(frames[2][0]["config"]["name"], "A2");
}

#[test]
fn test_later_connection_owns_shared_identity() {
    let core = RouterCore::new(RouterConfig::default());
    let (first, _) = open(&core, "10.0.0.1");
    let (second, second_frames) = open(&core, "10.0.0.1");
    let (p, _) = open(&core, "10.0.0.5");
    let (admin, _) = admin(&core, "10.0.0.9");

    send(&core, &first, subscriber_config("lamp", "light", "boolean")).unwrap();
    send(&core, &second, subscriber_config("lamp", "light", "boolean")).unwrap();
    send(&core, &p, publisher_config("P", "btn", "boolean")).unwrap();
    send(
        &core,
        &admin,
        route(
            "add",
            endpoint("P", "10.0.0.5", "btn", "boolean"),
            endpoint("lamp", "10.0.0.1", "light", "boolean"),
        ),
    )
    .unwrap();

    core.close(&first);
    assert!(core.registry().find("lamp", "10.0.0.1").is_some());
    assert_eq!(core.routes().len(), 1);

    send(&core, &p, json!({"message": {"name": "btn", "type": "boolean", "value": "true"}})).unwrap();
    assert_eq!(second_frames.json()[0]["message"]["name"], "light");
}

#[test]
fn test_frames_after_close_are_ignored() {
    let core = RouterCore::new(RouterConfig::default());
    let (a, _) = open(&core, "10.0.0.1");
    core.close(&a);

    send(&core, &a, publisher_config("A", "btn", "boolean")).unwrap();
    assert!(core.registry().is_empty());
    assert_eq!(core.session_count(), 0);
}

#[test]
fn test_connection_limit() {
    let core = RouterCore::new(RouterConfig {
        max_connections: 1,
        ..Default::default()
    });
    let _first = open(&core, "10.0.0.1");

    let result = core.open(RecordingSender::new(), peer("10.0.0.2", 1));
    assert!(matches!(result, Err(RouterError::ConnectionLimit(1))));
}

#[test]
fn test_full_subscriber_queue_drops_only_that_delivery() {
    let core = RouterCore::new(RouterConfig::default());
    let (p, _) = open(&core, "10.0.0.1");
    let slow_sender = RecordingSender::bounded(0);
    let slow = core.open(slow_sender.clone(), peer("10.0.0.2", 1)).unwrap();
    let (fast, fast_frames) = open(&core, "10.0.0.3");
    let (admin, _) = admin(&core, "10.0.0.9");

    send(&core, &p, publisher_config("P", "x", "string")).unwrap();
    send(&core, &fast, subscriber_config("fast", "in", "string")).unwrap();
    // The bounded sender never accepts a frame, but registration only needs inbound frames
    send(&core, &slow, subscriber_config("slow", "in", "string")).unwrap();

    let x = endpoint("P", "10.0.0.1", "x", "string");
    send(&core, &admin, route("add", x.clone(), endpoint("slow", "10.0.0.2", "in", "string"))).unwrap();
    send(&core, &admin, route("add", x, endpoint("fast", "10.0.0.3", "in", "string"))).unwrap();

    let sender = core.registry().find("P", "10.0.0.1").unwrap();
    let report = core
        .dispatch(&sender, &DataMessage::new("x", "string", "hello"))
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(fast_frames.len(), 1);
    assert!(slow_sender.is_empty());
}

#[tokio::test]
async fn test_router_throttle_keeps_latest() {
    let core = RouterCore::new(RouterConfig {
        send_interval: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let (p, _) = open(&core, "10.0.0.1");
    let (s, s_frames) = open(&core, "10.0.0.2");
    let (admin, _) = admin(&core, "10.0.0.9");

    send(&core, &p, publisher_config("P", "x", "range")).unwrap();
    send(&core, &s, subscriber_config("S", "in", "range")).unwrap();
    send(
        &core,
        &admin,
        route(
            "add",
            endpoint("P", "10.0.0.1", "x", "range"),
            endpoint("S", "10.0.0.2", "in", "range"),
        ),
    )
    .unwrap();

    for value in [1, 2, 3] {
        send(&core, &p, json!({"message": {"name": "x", "type": "range", "value": value}})).unwrap();
    }
    assert_eq!(s_frames.len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let values: Vec<_> = s_frames
        .json()
        .iter()
        .map(|f| f["message"]["value"].clone())
        .collect();
    assert_eq!(values, vec![json!(1), json!(3)]);
}
