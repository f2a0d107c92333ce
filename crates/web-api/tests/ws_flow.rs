mod support;

use std::{net::SocketAddr, time::Duration};

use axum::http::Method;
use domain::{Channel, Destination, RoomId, RoomName, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use support::{identity, TestApp};
use tokio::{net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{ClientFrame, ServerFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    async fn start(app: &TestApp) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let router = app.router.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server");
        });

        Self {
            addr,
            shutdown: Some(shutdown_tx),
        }
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn connect(&self, token: &str) -> Socket {
        let url = format!("ws://{}/api/v1/ws?token={token}", self.addr);
        let (socket, _) = connect_async(url).await.expect("ws connect");
        socket
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn next_frame(socket: &mut Socket) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame before timeout")
            .expect("socket open")
            .expect("frame");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("server frame");
        }
    }
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).expect("client frame");
    socket.send(WsMessage::text(text)).await.expect("send frame");
}

/// 连接建立后的第一帧总是自己用户通道的订阅确认
async fn connect_and_expect_own_channel(server: &Server, token: &str, user_id: UserId) -> Socket {
    let mut socket = server.connect(token).await;
    match next_frame(&mut socket).await {
        ServerFrame::Subscribed { destination, .. } => {
            assert_eq!(destination, Destination::User(user_id));
        }
        other => panic!("unexpected frame {other:?}"),
    }
    socket
}

async fn subscribe_room(socket: &mut Socket, name: &str) -> u64 {
    let destination = Destination::Room(RoomName::parse(name).unwrap());
    send_frame(socket, &ClientFrame::Subscribe { destination }).await;
    match next_frame(socket).await {
        ServerFrame::Subscribed { subscription, .. } => subscription,
        other => panic!("unexpected frame {other:?}"),
    }
}

async fn create_room(app: &TestApp, token: &str, name: &str) -> RoomId {
    let (_, room) = app
        .call(Method::POST, "/api/v1/rooms", Some(token), Some(json!({"name": name})))
        .await;
    RoomId::from(room["id"].as_str().unwrap().parse::<Uuid>().unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn room_messages_sent_over_http_reach_websocket_subscribers() {
    let app = TestApp::new();
    let server = Server::start(&app).await;
    let alice = identity("alice");
    let bob = identity("bob");
    let alice_token = app.token_for(&alice);
    let bob_token = app.token_for(&bob);
    create_room(&app, &alice_token, "general").await;

    let mut bob_socket = connect_and_expect_own_channel(&server, &bob_token, bob.id).await;
    let subscription = subscribe_room(&mut bob_socket, "general").await;

    let client = reqwest::Client::new();
    let response = client
        .post(server.http("/api/v1/rooms/general/messages"))
        .bearer_auth(&alice_token)
        .json(&json!({"body": "hello"}))
        .send()
        .await
        .expect("send message");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let receipt = response.json::<serde_json::Value>().await.expect("receipt");
    assert_eq!(receipt["delivered"], 1);

    match next_frame(&mut bob_socket).await {
        ServerFrame::Message {
            subscription: delivered_to,
            message,
        } => {
            assert_eq!(delivered_to, subscription);
            assert_eq!(message.body, "hello");
            assert_eq!(message.sender_id, alice.id.0);
            assert_eq!(message.id, 1);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn websocket_sends_are_acknowledged_and_fanned_out() {
    let app = TestApp::new();
    let server = Server::start(&app).await;
    let alice = identity("alice");
    let bob = identity("bob");
    let alice_token = app.token_for(&alice);
    create_room(&app, &alice_token, "general").await;

    let mut alice_socket = connect_and_expect_own_channel(&server, &alice_token, alice.id).await;
    let mut bob_socket = connect_and_expect_own_channel(&server, &app.token_for(&bob), bob.id).await;
    subscribe_room(&mut alice_socket, "general").await;
    subscribe_room(&mut bob_socket, "general").await;

    let client_message_id = Uuid::new_v4();
    send_frame(
        &mut alice_socket,
        &ClientFrame::Send {
            destination: Destination::Room(RoomName::parse("general").unwrap()),
            body: "over the socket".to_string(),
            client_message_id: Some(client_message_id),
        },
    )
    .await;

    // 发送者既收到确认，也作为房间订阅者收到消息本身，两者顺序不固定
    let mut acked = false;
    let mut echoed = false;
    for _ in 0..2 {
        match next_frame(&mut alice_socket).await {
            ServerFrame::Ack {
                client_message_id: acked_id,
                receipt,
            } => {
                assert_eq!(acked_id, Some(client_message_id));
                assert_eq!(receipt.delivered, 2);
                assert!(!receipt.duplicate);
                acked = true;
            }
            ServerFrame::Message { message, .. } => {
                assert_eq!(message.body, "over the socket");
                echoed = true;
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert!(acked && echoed);

    match next_frame(&mut bob_socket).await {
        ServerFrame::Message { message, .. } => {
            assert_eq!(message.body, "over the socket");
            assert_eq!(message.client_message_id, Some(client_message_id));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn direct_messages_reach_the_receivers_own_channel() {
    let app = TestApp::new();
    let server = Server::start(&app).await;
    let alice = identity("alice");
    let bob = identity("bob");
    let mut bob_socket = connect_and_expect_own_channel(&server, &app.token_for(&bob), bob.id).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/users/{}/messages", bob.id),
            Some(&app.token_for(&alice)),
            Some(json!({"body": "just for you"})),
        )
        .await;
    assert_eq!(status, axum::http::StatusCode::CREATED);

    match next_frame(&mut bob_socket).await {
        ServerFrame::Message { message, .. } => {
            assert_eq!(message.body, "just for you");
            assert_eq!(message.receiver_id, Some(bob.id.0));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_requires_a_valid_token() {
    let app = TestApp::new();
    let server = Server::start(&app).await;

    let without_token = connect_async(format!("ws://{}/api/v1/ws", server.addr)).await;
    assert!(without_token.is_err());

    let garbage = connect_async(format!("ws://{}/api/v1/ws?token=garbage", server.addr)).await;
    assert!(garbage.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protocol_errors_keep_the_session_open() {
    let app = TestApp::new();
    let server = Server::start(&app).await;
    let alice = identity("alice");
    let mut socket = connect_and_expect_own_channel(&server, &app.token_for(&alice), alice.id).await;

    socket
        .send(WsMessage::text("not json"))
        .await
        .expect("send garbage");
    match next_frame(&mut socket).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, "BAD_FRAME"),
        other => panic!("unexpected frame {other:?}"),
    }

    let someone_else = Destination::User(UserId::from(Uuid::new_v4()));
    send_frame(&mut socket, &ClientFrame::Subscribe { destination: someone_else }).await;
    match next_frame(&mut socket).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("unexpected frame {other:?}"),
    }

    let missing_room = Destination::Room(RoomName::parse("missing").unwrap());
    send_frame(&mut socket, &ClientFrame::Subscribe { destination: missing_room }).await;
    match next_frame(&mut socket).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, "NOT_FOUND"),
        other => panic!("unexpected frame {other:?}"),
    }

    send_frame(&mut socket, &ClientFrame::Ping).await;
    assert_eq!(next_frame(&mut socket).await, ServerFrame::Pong);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_and_disconnect_release_subscriptions() {
    let app = TestApp::new();
    let server = Server::start(&app).await;
    let alice = identity("alice");
    let alice_token = app.token_for(&alice);
    let room_id = create_room(&app, &alice_token, "general").await;

    let mut socket = connect_and_expect_own_channel(&server, &alice_token, alice.id).await;
    let subscription = subscribe_room(&mut socket, "general").await;
    assert_eq!(app.state.hub.subscriber_count(Channel::Room(room_id)).await, 1);

    send_frame(&mut socket, &ClientFrame::Unsubscribe { subscription }).await;
    assert_eq!(
        next_frame(&mut socket).await,
        ServerFrame::Unsubscribed { subscription }
    );
    assert_eq!(app.state.hub.subscriber_count(Channel::Room(room_id)).await, 0);

    // 重复取消同样得到确认
    send_frame(&mut socket, &ClientFrame::Unsubscribe { subscription }).await;
    assert_eq!(
        next_frame(&mut socket).await,
        ServerFrame::Unsubscribed { subscription }
    );

    socket.close(None).await.expect("close");
    let own_channel = Channel::User(alice.id);
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = app.state.hub.subscriber_count(own_channel).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}
