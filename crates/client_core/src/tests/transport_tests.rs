use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use shared::domain::ConnectionTarget;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

use super::*;
use crate::connection::endpoint_for;

type CloseReport = Arc<Mutex<Option<oneshot::Sender<bool>>>>;

async fn spawn_ws_server(close_report: CloseReport) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/ws/chat", get(echo_upgrade))
        .route("/ws/reject", get(reject_upgrade))
        .route("/ws/token", get(token_upgrade))
        .route("/ws/watch-close", get(watch_close_upgrade))
        .with_state(close_report);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn echo_upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            if let WsMessage::Text(text) = message {
                if socket.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn reject_upgrade(
    ws: WebSocketUpgrade,
    State(close_report): State<CloseReport>,
) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: 4001,
                reason: "Unauthorized".into(),
            })))
            .await;
        let acknowledged = matches!(socket.recv().await, Some(Ok(WsMessage::Close(_))));
        if let Some(report) = close_report.lock().await.take() {
            let _ = report.send(acknowledged);
        }
    })
}

async fn token_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = params.get("token").cloned().unwrap_or_default();
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket.send(WsMessage::Text(token)).await;
        while socket.recv().await.is_some() {}
    })
}

async fn watch_close_upgrade(
    ws: WebSocketUpgrade,
    State(close_report): State<CloseReport>,
) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let saw_close = matches!(socket.recv().await, Some(Ok(WsMessage::Close(_))));
        if let Some(report) = close_report.lock().await.take() {
            let _ = report.send(saw_close);
        }
    })
}

fn ws_url(base: &str, path: &str) -> Url {
    Url::parse(&format!("{}{path}", base.replacen("http", "ws", 1))).expect("ws url")
}

#[tokio::test]
async fn open_link_echoes_text_frames() {
    let base = spawn_ws_server(Arc::new(Mutex::new(None))).await;
    let endpoint = endpoint_for(&ConnectionTarget::new(base, "")).expect("endpoint");
    let mut link = WebSocketTransport::new()
        .open(&endpoint)
        .await
        .expect("open websocket");

    assert!(link.send(r#"{"type":"ping"}"#.to_string()));
    assert_eq!(
        link.next_event().await,
        TransportEvent::Message(r#"{"type":"ping"}"#.to_string())
    );
}

#[tokio::test]
async fn server_close_code_is_reported() {
    let base = spawn_ws_server(Arc::new(Mutex::new(None))).await;
    let mut link = WebSocketTransport::new()
        .open(&ws_url(&base, "/ws/reject"))
        .await
        .expect("open websocket");

    assert_eq!(link.next_event().await, TransportEvent::Closed(Some(4001)));
    assert_eq!(link.next_event().await, TransportEvent::Closed(None));
}

#[tokio::test]
async fn server_close_is_acknowledged() {
    let (report_tx, report_rx) = oneshot::channel();
    let base = spawn_ws_server(Arc::new(Mutex::new(Some(report_tx)))).await;
    let mut link = WebSocketTransport::new()
        .open(&ws_url(&base, "/ws/reject"))
        .await
        .expect("open websocket");

    assert_eq!(link.next_event().await, TransportEvent::Closed(Some(4001)));
    let acknowledged = tokio::time::timeout(Duration::from_secs(5), report_rx)
        .await
        .expect("server finished in time")
        .expect("close report");
    assert!(acknowledged);
}

#[tokio::test]
async fn token_travels_in_the_query_string() {
    let base = spawn_ws_server(Arc::new(Mutex::new(None))).await;
    let mut endpoint = ws_url(&base, "/ws/token");
    endpoint
        .query_pairs_mut()
        .append_pair("token", "s3cret&more");
    let mut link = WebSocketTransport::new()
        .open(&endpoint)
        .await
        .expect("open websocket");

    assert_eq!(
        link.next_event().await,
        TransportEvent::Message("s3cret&more".to_string())
    );
}

#[tokio::test]
async fn dropping_the_link_closes_the_socket() {
    let (report_tx, report_rx) = oneshot::channel();
    let base = spawn_ws_server(Arc::new(Mutex::new(Some(report_tx)))).await;
    let link = WebSocketTransport::new()
        .open(&ws_url(&base, "/ws/watch-close"))
        .await
        .expect("open websocket");

    drop(link);

    assert!(report_rx.await.expect("close report"));
}

#[tokio::test]
async fn unreachable_server_fails_to_open() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let endpoint = Url::parse(&format!("ws://{addr}/ws/chat")).expect("url");
    let err = WebSocketTransport::new()
        .open(&endpoint)
        .await
        .expect_err("nothing is listening");

    assert!(matches!(err, TransportError::Connect { .. }));
}

#[test]
fn redacted_endpoint_hides_the_token() {
    let endpoint = Url::parse("ws://host:8080/ws/chat?token=secret").expect("url");
    assert_eq!(redacted(&endpoint), "ws://host:8080/ws/chat");
}
