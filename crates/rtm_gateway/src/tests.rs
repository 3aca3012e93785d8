use crate::bus::{BusConsumer, MemoryBus};
use crate::bus::memory::PublishedMessage;
use crate::config::consumer_topic_for;
use crate::discovery::{MemoryDiscovery, NodeAnnouncer};
use crate::test_support::{claims_json, mint, FixedMetrics, SECRET};
use crate::{GatewayConfig, GatewayServer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    server: Arc<GatewayServer>,
    bus: Arc<MemoryBus>,
    addr: SocketAddr,
}

async fn start_gateway() -> Harness {
    let bus = Arc::new(MemoryBus::new());
    bus.connect_now().await;
    let config = GatewayConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        token_secret: SECRET.to_string(),
        ..Default::default()
    };
    let server = Arc::new(GatewayServer::new(config, "127.0.0.1", bus.clone(), Arc::new(FixedMetrics)));

    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    let deliveries = bus.subscribe(server.consumer_topic()).await.unwrap();
    server.start_delivery(deliveries);

    Harness { server, bus, addr }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn authenticate(client: &mut Client, user_id: &str, finger_print: &str) {
    send_json(
        client,
        json!({
            "command": "ws_auth",
            "auth_token": mint(SECRET, &claims_json(user_id, finger_print, "Messenger (iPhone; iOS 17)")),
        }),
    )
    .await;
}

async fn next_text(client: &mut Client) -> String {
    loop {
        match tokio::time::timeout(WAIT, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return text.as_str().to_owned(),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Waits until the client observes the server closing the connection.
async fn expect_closed(client: &mut Client) {
    match tokio::time::timeout(WAIT, client.next()).await {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {}
        other => panic!("expected the connection to close, got {other:?}"),
    }
}

async fn wait_for_command(
    watch: &mut broadcast::Receiver<PublishedMessage>,
    command: &str,
) -> Map<String, Value> {
    tokio::time::timeout(WAIT, async {
        loop {
            let published = watch.recv().await.unwrap();
            if published.command().as_deref() == Some(command) {
                return published.body().unwrap();
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {command} published"))
}

#[tokio::test]
async fn test_end_to_end_auth_relay_delivery_and_close() {
    let harness = start_gateway().await;
    let mut watch = harness.bus.watch();
    let mut client = connect(harness.addr).await;

    authenticate(&mut client, "42", "abc").await;
    let cached = wait_for_command(&mut watch, "ws_cache_connection").await;
    assert_eq!(cached["user_signature"], json!("42_abc"));
    assert_eq!(cached["host"], json!("127.0.0.1"));
    assert_eq!(cached["user_agent"], json!("Messenger (iPhone; iOS 17)"));

    send_json(&mut client, json!({ "command": "ws_ping" })).await;
    assert_eq!(next_text(&mut client).await, r#"{"event":"pong"}"#);

    send_json(
        &mut client,
        json!({ "command": "ws_ephemeral_typing", "channel_id": 12 }),
    )
    .await;
    let typing = wait_for_command(&mut watch, "ws_ephemeral_typing").await;
    assert_eq!(typing["channel_id"], json!(12));
    assert_eq!(typing["user_signature"], json!("42_abc"));
    assert_eq!(typing["source"], json!("websocket_server"));

    let delivered = harness
        .bus
        .deliver(
            &consumer_topic_for("127.0.0.1"),
            r#"{"token":{"user_id":"42","finger_print":"abc"},"rtm_payload":{"event":"message","id":1}}"#,
        )
        .await;
    assert!(delivered);
    assert_eq!(next_text(&mut client).await, r#"{"event":"message","id":1}"#);

    let counts = harness.server.get_registry().counts().await;
    assert_eq!((counts.active, counts.ios), (1, 1));

    client.close(None).await.unwrap();
    let purged = wait_for_command(&mut watch, "ws_purge_connection").await;
    assert_eq!(purged["user_signature"], json!("42_abc"));

    harness.server.shutdown().await;
}

#[tokio::test]
async fn test_second_login_with_same_identity_closes_first_socket() {
    let harness = start_gateway().await;
    let mut watch = harness.bus.watch();

    let mut first = connect(harness.addr).await;
    authenticate(&mut first, "7", "tab").await;
    wait_for_command(&mut watch, "ws_cache_connection").await;

    let mut second = connect(harness.addr).await;
    authenticate(&mut second, "7", "tab").await;
    wait_for_command(&mut watch, "ws_purge_connection").await;
    wait_for_command(&mut watch, "ws_cache_connection").await;

    expect_closed(&mut first).await;

    // Deliveries now reach the newest socket.
    harness
        .bus
        .deliver(
            harness.server.consumer_topic(),
            r#"{"token":{"user_id":7,"finger_print":"tab"},"rtm_payload":"hello"}"#,
        )
        .await;
    assert_eq!(next_text(&mut second).await, r#""hello""#);

    harness.server.shutdown().await;
}

#[tokio::test]
async fn test_bad_token_and_unauthenticated_commands_close_the_socket() {
    let harness = start_gateway().await;

    let mut forged = connect(harness.addr).await;
    send_json(
        &mut forged,
        json!({ "command": "ws_auth", "auth_token": mint("not-the-secret", &claims_json("1", "x", "")) }),
    )
    .await;
    expect_closed(&mut forged).await;

    let mut anonymous = connect(harness.addr).await;
    send_json(&mut anonymous, json!({ "command": "ws_read_notification" })).await;
    expect_closed(&mut anonymous).await;

    let mut garbage = connect(harness.addr).await;
    garbage.send(Message::Text("{{{".into())).await.unwrap();
    expect_closed(&mut garbage).await;

    assert!(harness.bus.published().await.is_empty());
    assert_eq!(harness.server.get_registry().take_traffic().errors, 3);

    harness.server.shutdown().await;
}

#[tokio::test]
async fn test_announced_node_uses_bound_port_and_consumer_topic() {
    let harness = start_gateway().await;
    let discovery = Arc::new(MemoryDiscovery::new());
    let announcer = NodeAnnouncer::new(
        discovery.clone(),
        "/rtm_nodes",
        harness.server.node_descriptor(harness.addr.port()),
        Duration::from_secs(1),
    );

    announcer.establish().await.unwrap();

    let expected = format!(
        "/rtm_nodes/http#127.0.0.1#{}#as_rtm_websockets_127_0.0.1",
        harness.addr.port()
    );
    assert!(discovery.nodes().await.contains(&expected));

    harness.server.shutdown().await;
}
