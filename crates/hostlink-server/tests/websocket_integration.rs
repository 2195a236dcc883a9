//! WebSocket transport tests over a real loopback socket.
//!
//! Each test binds `127.0.0.1:0`, runs [`serve`] in the background and talks
//! to it with a `tokio-tungstenite` client, so the handshake, sub-protocol
//! negotiation, Hello, frame decoding and close frames are all exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hostlink_core::auth::{expected_authentication_string, generate_secret};
use hostlink_core::protocol::codec::decode_as;
use hostlink_core::protocol::messages::{Frame, HelloPayload};
use hostlink_core::{encode_frame, EncodedFrame, EventSubscription, WireEncoding};
use hostlink_server::application::{EventSink, FrameClock};
use hostlink_server::domain::ServerConfig;
use hostlink_server::infrastructure::{serve, ServerContext, StandaloneExecutor};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PASSWORD: &str = "correct horse";

struct TestServer {
    url: String,
    context: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    _clock: FrameClock,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start(auth_required: bool) -> TestServer {
    let mut config = ServerConfig::default();
    config.auth.required = auth_required;
    config.auth.password = PASSWORD.to_string();
    config.ensure_salt();

    let clock = FrameClock::new();
    let context = Arc::new(ServerContext::new(
        config,
        Arc::new(StandaloneExecutor::new()),
        None,
        clock.waiter(),
        Handle::current(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(Arc::clone(&context), listener, Arc::clone(&running)));

    TestServer {
        url,
        context,
        running,
        _clock: clock,
    }
}

async fn connect(server: &TestServer, subprotocol: Option<&'static str>) -> Client {
    let mut request = server.url.as_str().into_client_request().unwrap();
    if let Some(token) = subprotocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(token));
    }
    let (client, _) = connect_async(request).await.unwrap();
    client
}

/// Next text or binary frame, or the close frame.
async fn next(client: &mut Client) -> Message {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for the server")
            .expect("stream ended")
            .expect("read failed");
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    match next(client).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn send_json(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn expect_close(client: &mut Client) -> u16 {
    match next(client).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

fn authentication_for(hello: &Value) -> String {
    let auth = &hello["d"]["authentication"];
    let secret = generate_secret(PASSWORD, auth["salt"].as_str().unwrap());
    expected_authentication_string(&secret, auth["challenge"].as_str().unwrap())
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_authenticated_handshake_then_request() {
    // Arrange
    let server = start(true).await;
    let mut client = connect(&server, None).await;

    // Act
    let hello = next_json(&mut client).await;
    let authentication = authentication_for(&hello);
    send_json(
        &mut client,
        json!({"op": 1, "d": {"rpcVersion": 1, "authentication": authentication}}),
    )
    .await;
    let identified = next_json(&mut client).await;
    send_json(
        &mut client,
        json!({"op": 6, "d": {"requestType": "GetVersion", "requestId": "v"}}),
    )
    .await;
    let response = next_json(&mut client).await;

    // Assert
    assert_eq!(hello["op"], 0);
    assert_eq!(hello["d"]["rpcVersion"], 1);
    assert_eq!(identified, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}));
    assert_eq!(response["op"], 7);
    assert_eq!(response["d"]["requestId"], "v");
    assert_eq!(response["d"]["requestStatus"]["code"], 100);
    assert_eq!(response["d"]["responseData"]["availableRequests"], json!(["GetVersion"]));
}

#[tokio::test]
async fn test_wrong_password_closes_with_authentication_failed() {
    let server = start(true).await;
    let mut client = connect(&server, None).await;
    next_json(&mut client).await;

    send_json(
        &mut client,
        json!({"op": 1, "d": {"rpcVersion": 1, "authentication": "bogus"}}),
    )
    .await;

    assert_eq!(expect_close(&mut client).await, 4009);
}

#[tokio::test]
async fn test_request_before_identify_closes_with_not_identified() {
    let server = start(false).await;
    let mut client = connect(&server, None).await;
    let hello = next_json(&mut client).await;
    assert!(hello["d"].get("authentication").is_none());

    send_json(&mut client, json!({"op": 6, "d": {"requestType": "GetVersion", "requestId": 1}})).await;

    assert_eq!(expect_close(&mut client).await, 4007);
}

// ── Frame decoding ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_undecodable_and_op_less_frames_close() {
    // Arrange
    let server = start(false).await;
    let mut garbage = connect(&server, None).await;
    let mut no_op = connect(&server, None).await;
    next_json(&mut garbage).await;
    next_json(&mut no_op).await;

    // Act
    garbage.send(Message::Text("{not json".to_string())).await.unwrap();
    send_json(&mut no_op, json!({"d": {"rpcVersion": 1}})).await;

    // Assert
    assert_eq!(expect_close(&mut garbage).await, 4002);
    assert_eq!(expect_close(&mut no_op).await, 4003);
}

#[tokio::test]
async fn test_msgpack_session_speaks_binary() {
    // Arrange
    let server = start(false).await;
    let mut client = connect(&server, Some("hostlink.msgpack")).await;

    // Act
    let hello = match next(&mut client).await {
        Message::Binary(bytes) => {
            decode_as::<Frame<HelloPayload>>(&EncodedFrame::Binary(bytes), WireEncoding::MsgPack).unwrap()
        }
        other => panic!("expected a binary Hello, got {other:?}"),
    };
    let identify = encode_frame(&json!({"op": 1, "d": {"rpcVersion": 1}}), WireEncoding::MsgPack).unwrap();
    let EncodedFrame::Binary(identify) = identify else {
        panic!("MessagePack encodes to binary");
    };
    client.send(Message::Binary(identify)).await.unwrap();
    let identified = match next(&mut client).await {
        Message::Binary(bytes) => decode_as::<Value>(&EncodedFrame::Binary(bytes), WireEncoding::MsgPack).unwrap(),
        other => panic!("expected a binary reply, got {other:?}"),
    };

    // Assert
    assert_eq!(hello.op, 0);
    assert!(hello.d.authentication.is_none());
    assert_eq!(identified, json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}));
}

#[tokio::test]
async fn test_text_frame_on_msgpack_session_closes_with_decode_error() {
    let server = start(false).await;
    let mut client = connect(&server, Some("hostlink.msgpack")).await;
    next(&mut client).await;

    send_json(&mut client, json!({"op": 1, "d": {"rpcVersion": 1}})).await;

    assert_eq!(expect_close(&mut client).await, 4002);
}

// ── Events ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_identified_client_receives_subscribed_events() {
    // Arrange
    let server = start(false).await;
    let mut client = connect(&server, None).await;
    next_json(&mut client).await;
    send_json(
        &mut client,
        json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": EventSubscription::SCENES}}),
    )
    .await;
    next_json(&mut client).await;

    // Act
    let broadcaster = server.context.broadcaster();
    broadcaster.broadcast_event(EventSubscription::INPUTS, "InputCreated", Some(json!({"inputName": "Mic"})), 0);
    broadcaster.broadcast_event(EventSubscription::SCENES, "SceneCreated", Some(json!({"sceneName": "Intro"})), 0);

    // Assert: only the Scenes event arrives
    let event = next_json(&mut client).await;
    assert_eq!(
        event,
        json!({"op": 5, "d": {"eventType": "SceneCreated", "eventIntent": 4, "eventData": {"sceneName": "Intro"}}})
    );
}

#[tokio::test]
async fn test_disconnect_unregisters_session() {
    // Arrange
    let server = start(false).await;
    let mut client = connect(&server, None).await;
    next_json(&mut client).await;
    send_json(&mut client, json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": 1}})).await;
    next_json(&mut client).await;
    assert_eq!(server.context.registry().len(), 1);

    // Act
    client.close(None).await.unwrap();
    drop(client);

    // Assert
    let registry = Arc::clone(server.context.registry());
    timeout(Duration::from_secs(5), async move {
        while !registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not unregistered");
    assert_eq!(server.context.registry().subscriptions().count(0), 0);
}
