mod support;

use std::net::SocketAddr;
use std::time::Duration;

use application::HubHandle;
use axum::http::{Method, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Error as WsError, tungstenite::Message, MaybeTlsStream,
    WebSocketStream,
};

use support::{build_app, TestApp};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn serve(app: &TestApp) -> Server {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router = app.router.clone();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    Server {
        addr,
        _shutdown: shutdown_tx,
    }
}

async fn connect(server: &Server, path: &str) -> Client {
    let url = format!("ws://{}{}", server.addr, path);
    let (client, _) = connect_async(url).await.expect("websocket connect");
    client
}

/// 等待推送中心中出现指定数量的会话
async fn wait_for_sessions(hub: &HubHandle, expected: usize) {
    for _ in 0..200 {
        if hub.list_sessions().await.expect("hub").len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {expected} sessions");
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

#[tokio::test]
async fn test_order_frame_fans_out_to_staff() {
    let app = build_app().await;
    let server = serve(&app).await;

    let mut kitchen = connect(&server, "/ws/kitchen/k1?email=k1@example.com").await;
    let mut employee = connect(&server, "/ws/employee/e1?email=e1@example.com").await;
    let mut customer = connect(&server, "/ws/user/u1?email=u1@example.com&room=table-3").await;
    wait_for_sessions(&app.state.hub, 3).await;

    let frame = json!({
        "type": "order",
        "action": "create_message",
        "role": "user",
        "payload": {
            "fromUserId": "u1",
            "toUserId": "u2",
            "payload": { "orderId": 7, "items": ["soup"] }
        }
    });
    customer
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send order");

    let expected = json!({
        "type": "order",
        "action": "new_order",
        "payload": { "orderId": 7, "items": ["soup"] },
        "role": "employee"
    });
    assert_eq!(next_json(&mut kitchen).await, expected);
    assert_eq!(next_json(&mut employee).await, expected);
    assert_silent(&mut customer).await;
}

#[tokio::test]
async fn test_upgrade_requires_email() {
    let app = build_app().await;
    let server = serve(&app).await;

    let url = format!("ws://{}/ws/kitchen/k1", server.addr);
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::BAD_REQUEST),
        other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_upgrade_rejects_bad_token() {
    let app = build_app().await;
    let server = serve(&app).await;

    let url = format!(
        "ws://{}/ws/user/u1?email=u1@example.com&token=not-a-token",
        server.addr
    );
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_issued_realtime_token_opens_session() {
    let app = build_app().await;
    let server = serve(&app).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/ws/api/ws-auth",
            None,
            Some(json!({ "userId": "guest-9", "email": "guest9@example.com", "role": "guest" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "guest");
    assert_eq!(body["data"]["userId"], "guest-9");
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let _client = connect(
        &server,
        &format!("/ws/guest/guest-9?email=guest9@example.com&token={token}"),
    )
    .await;
    wait_for_sessions(&app.state.hub, 1).await;

    // 实时令牌不能访问账户接口
    let (status, _) = app
        .call(Method::GET, "/api/v1/accounts", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/ws/api/ws-auth",
            None,
            Some(json!({ "userId": "m1", "email": "m1@example.com", "role": "manager" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_session() {
    let app = build_app().await;
    let server = serve(&app).await;

    let mut first = connect(&server, "/ws/kitchen/k1?email=k1@example.com").await;
    wait_for_sessions(&app.state.hub, 1).await;
    let mut second = connect(&server, "/ws/kitchen/k1?email=k1@example.com").await;

    // 旧连接的出站队列被关闭，服务端发送关闭帧
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "superseded session should be closed");

    wait_for_sessions(&app.state.hub, 1).await;
    app.state
        .hub
        .notify_staff_order(json!({ "orderId": 1 }))
        .await
        .expect("notify");
    assert_eq!(next_json(&mut second).await["payload"], json!({ "orderId": 1 }));
}

#[tokio::test]
async fn test_order_endpoint_and_client_listing() {
    let app = build_app().await;
    let server = serve(&app).await;
    let admin = app.seed("admin@example.com", "admin", None).await;
    let plain = app.seed("plain@example.com", "user", None).await;
    let admin_token = app.access_token(&admin);
    let plain_token = app.access_token(&plain);

    let mut kitchen = connect(
        &server,
        "/ws/kitchen/k1?email=k1@example.com&tableToken=secret-table",
    )
    .await;
    wait_for_sessions(&app.state.hub, 1).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/ws/api/orders",
            Some(&plain_token),
            Some(json!({ "orderId": 42 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delivered"], 1);
    let frame = next_json(&mut kitchen).await;
    assert_eq!(frame["action"], "new_order");
    assert_eq!(frame["payload"]["orderId"], 42);

    let (status, _) = app
        .call(Method::GET, "/ws/api/clients", Some(&plain_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::GET, "/ws/api/clients", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["counts"]["kitchen"], 1);
    let session = &body["data"]["sessions"][0];
    assert_eq!(session["id"], "k1");
    assert_eq!(session["metadata"]["email"], "k1@example.com");
    assert!(session["metadata"].get("tableToken").is_none());
}

#[tokio::test]
async fn test_client_close_unregisters_session() {
    let app = build_app().await;
    let server = serve(&app).await;

    let mut client = connect(&server, "/ws/user/u1?email=u1@example.com").await;
    wait_for_sessions(&app.state.hub, 1).await;
    client.close(None).await.expect("close");
    wait_for_sessions(&app.state.hub, 0).await;
}
