//! Loopback management server for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

pub(crate) const TOKEN: &str = "s3cret-token";

type Log = Arc<Mutex<Vec<String>>>;

/// How the server treats connections accepted from now on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behaviour {
    Normal,
    /// Closes the TCP stream before the handshake.
    Refuse,
    /// Answers every handshake with 401.
    Unauthorized,
    /// Waits this long before answering the handshake.
    SlowHandshake(Duration),
    /// Completes the handshake, never reads (so never pongs), and hangs up
    /// after this long.
    Mute(Duration),
}

/// Accepts any number of connections. Method behaviour:
///
/// - `server/status`, `players`, `serversettings/max_players`,
///   `server/command` (echoes the command), `server/stop`: canned results
/// - `notify`: pushes a player-joined notification, then answers
/// - `slow`: never answers
/// - `drop`: hangs up
/// - anything else: method-not-found error
pub(crate) struct FakeServer {
    pub(crate) port: u16,
    accepted: Arc<AtomicUsize>,
    behaviour: Arc<Mutex<Behaviour>>,
    headers: Log,
    methods: Log,
}

impl FakeServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let behaviour = Arc::new(Mutex::new(Behaviour::Normal));
        let headers: Log = Arc::default();
        let methods: Log = Arc::default();

        {
            let accepted = accepted.clone();
            let behaviour = behaviour.clone();
            let headers = headers.clone();
            let methods = methods.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let mode = *behaviour.lock().unwrap();
                    tokio::spawn(serve(stream, mode, headers.clone(), methods.clone()));
                }
            });
        }

        Self {
            port,
            accepted,
            behaviour,
            headers,
            methods,
        }
    }

    pub(crate) fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn auth_headers(&self) -> Vec<String> {
        self.headers.lock().unwrap().clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

async fn serve(stream: TcpStream, mode: Behaviour, headers: Log, methods: Log) {
    match mode {
        Behaviour::Refuse => return,
        Behaviour::SlowHandshake(delay) => tokio::time::sleep(delay).await,
        _ => {}
    }

    let check = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let auth = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let ok = mode != Behaviour::Unauthorized && auth == format!("Bearer {TOKEN}");
        headers.lock().unwrap().push(auth);
        if ok {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some("unauthorized".into()));
            *err.status_mut() = StatusCode::UNAUTHORIZED;
            Err(err)
        }
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, check).await else {
        return;
    };
    if let Behaviour::Mute(hold) = mode {
        tokio::time::sleep(hold).await;
        return;
    }

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let req: Value = serde_json::from_str(&text).unwrap();
        let id = req["id"].clone();
        let method = req["method"].as_str().unwrap_or_default().to_string();
        methods.lock().unwrap().push(method.clone());

        let result = match method.as_str() {
            "minecraft:server/status" => json!({"started": true, "version": {"name": "1.21.9"}}),
            "minecraft:players" => json!([
                {"id": "0f3c-a", "name": "Alice"},
                {"id": "0f3c-b", "name": "Bob"},
            ]),
            "minecraft:serversettings/max_players" => json!(50),
            "minecraft:server/command" => req["params"][0]["command"].clone(),
            "minecraft:server/stop" => json!(true),
            "minecraft:notify" => {
                let note = json!({
                    "jsonrpc": "2.0",
                    "method": "minecraft:notification/players/joined",
                    "params": [{"name": "Alice"}],
                });
                if ws.send(Message::Text(note.to_string().into())).await.is_err() {
                    return;
                }
                json!(true)
            }
            "minecraft:slow" => continue,
            "minecraft:drop" => return,
            _ => {
                let err = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not found"},
                });
                if ws.send(Message::Text(err.to_string().into())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
            return;
        }
    }
}
