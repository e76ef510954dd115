use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use qtrig_hub::{serve, AppState, Hub, HubConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(HubConfig::default()).await
    }

    async fn start_with(config: HubConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = AppState::new(Hub::new(config.liveness_threshold), config, None);
        tokio::spawn(async move {
            serve(listener, state, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });
        Self {
            addr,
            _shutdown: shutdown_tx,
        }
    }

    async fn connect(&self) -> Socket {
        let url = format!("ws://{}/ws", self.addr);
        let (socket, _) = timeout(STEP, connect_async(url)).await.unwrap().unwrap();
        socket
    }

    async fn controller(&self) -> Socket {
        let mut socket = self.connect().await;
        send(&mut socket, json!({ "event": "register_qtrig_client" })).await;
        next_event(&mut socket, "registration_success").await;
        socket
    }

    async fn get(&self, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        timeout(STEP, stream.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        let raw = String::from_utf8(raw).unwrap();
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        (status, body.to_string())
    }
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::text(value.to_string())).await.unwrap();
}

/// Reads frames until an event with the given name arrives and returns its data.
async fn next_event(socket: &mut Socket, name: &str) -> Value {
    timeout(STEP, async {
        loop {
            let frame = socket.next().await.unwrap().unwrap();
            let Message::Text(text) = frame else {
                continue;
            };
            let envelope: Value = serde_json::from_str(text.as_str()).unwrap();
            if envelope["event"] == name {
                return envelope.get("data").cloned().unwrap_or(Value::Null);
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

#[tokio::test]
async fn observer_commands_reach_the_controller() {
    let server = TestServer::start().await;
    let mut controller = server.controller().await;
    let mut observer = server.connect().await;
    next_event(&mut observer, "status").await;

    send(
        &mut observer,
        json!({ "event": "select_satellite", "data": { "satellite": "ISS" } }),
    )
    .await;

    let data = next_event(&mut controller, "cmd_select_satellite").await;
    assert_eq!(data, json!({ "satellite": "ISS" }));
}

#[tokio::test]
async fn binary_frames_carrying_json_are_accepted() {
    let server = TestServer::start().await;
    let mut controller = server.controller().await;
    let mut observer = server.connect().await;

    let frame = json!({ "event": "start_tracking" }).to_string().into_bytes();
    observer.send(Message::binary(frame)).await.unwrap();

    next_event(&mut controller, "cmd_start_tracking").await;
}

#[tokio::test]
async fn heartbeat_marks_controller_reachable() {
    let server = TestServer::start().await;

    let (code, body) = server.get("/status").await;
    assert_eq!(code, 200);
    let status: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["status"], "running");
    assert_eq!(status["qtrig_connected"], false);

    let mut controller = server.controller().await;
    send(
        &mut controller,
        json!({ "event": "heartbeat", "data": { "state": { "tracking": true } } }),
    )
    .await;
    loop {
        let data = next_event(&mut controller, "status").await;
        if data["tracking"] == true {
            break;
        }
    }

    let (_, body) = server.get("/status").await;
    let status: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["qtrig_connected"], true);
    assert_eq!(status["clients"], 1);
}

#[tokio::test]
async fn closing_the_owner_socket_stops_transmission() {
    let server = TestServer::start().await;
    let mut controller = server.controller().await;
    let mut owner = server.connect().await;
    let mut other = server.connect().await;

    send(&mut owner, json!({ "event": "start_audio_tx" })).await;
    next_event(&mut controller, "cmd_start_audio_tx").await;

    send(&mut other, json!({ "event": "start_audio_tx" })).await;
    let rejection = next_event(&mut other, "audio_error").await;
    assert_eq!(rejection["error"], "session_busy");

    owner.close(None).await.unwrap();
    next_event(&mut controller, "cmd_stop_audio_tx").await;

    send(&mut other, json!({ "event": "start_audio_tx" })).await;
    next_event(&mut controller, "cmd_start_audio_tx").await;
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() {
    let server = TestServer::start().await;
    let mut controller = server.controller().await;
    let mut observer = server.connect().await;

    observer.send(Message::text("not json")).await.unwrap();
    send(&mut observer, json!({ "event": "launch_rocket" })).await;
    send(&mut observer, json!({ "event": "park_rotator" })).await;

    next_event(&mut controller, "cmd_park_rotator").await;
}

#[tokio::test]
async fn index_falls_back_to_plain_text_without_page() {
    let config = HubConfig {
        web_client: PathBuf::from("/nonexistent/web_api_client.html"),
        ..HubConfig::default()
    };
    let server = TestServer::start_with(config).await;

    let (code, body) = server.get("/").await;
    assert_eq!(code, 200);
    assert!(body.starts_with("Web client not found."));
}

#[tokio::test]
async fn index_serves_configured_page() {
    let mut page = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
    write!(page, "<html><body>qtrig remote</body></html>").unwrap();
    let config = HubConfig {
        web_client: page.path().to_path_buf(),
        ..HubConfig::default()
    };
    let server = TestServer::start_with(config).await;

    let (code, body) = server.get("/").await;
    assert_eq!(code, 200);
    assert!(body.contains("qtrig remote"));
}

#[tokio::test]
async fn metrics_route_is_absent_without_recorder() {
    let server = TestServer::start().await;
    let (code, _) = server.get("/metrics").await;
    assert_eq!(code, 404);
}
