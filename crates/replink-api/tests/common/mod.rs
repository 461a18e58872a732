//! Mock Repetier-Server WebSocket endpoint for integration tests.
//!
//! Accepts any number of connections on an ephemeral port and hands each
//! upgraded socket to the test as a [`Peer`] the test drives by hand.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use replink_api::{Endpoint, SecretString};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub const API_KEY: &str = "test-key";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockServer {
    port: u16,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                if tx.send(Peer { ws }).is_err() {
                    break;
                }
            }
        });

        Self { port, peers }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port, SecretString::from(API_KEY.to_owned()))
    }

    /// Next upgraded client connection.
    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no client connected in time")
            .expect("listener stopped")
    }

    /// Accept the next connection and answer its login successfully.
    pub async fn accept_logged_in(&mut self) -> Peer {
        let mut peer = self.accept().await;
        peer.expect_login(true).await;
        peer
    }
}

pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    /// Next text frame from the client, parsed.
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from client in time")
                .expect("client went away")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Next text frame if one arrives within `window`.
    pub async fn recv_within(&mut self, window: Duration) -> Option<Value> {
        loop {
            let message = tokio::time::timeout(window, self.ws.next()).await.ok()??.ok()?;
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).ok();
            }
        }
    }

    /// Read the next request and check its action name.
    pub async fn expect(&mut self, action: &str) -> Value {
        let request = self.recv().await;
        assert_eq!(request["action"], action, "unexpected request: {request}");
        request
    }

    /// Read the login request and answer it with `ok`.
    pub async fn expect_login(&mut self, ok: bool) {
        let login = self.expect("login").await;
        assert_eq!(login["data"]["apikey"], API_KEY);
        self.respond(&login, json!({ "ok": ok })).await;
    }

    /// Answer `request` with `data` under its callback id.
    pub async fn respond(&mut self, request: &Value, data: Value) {
        let id = request["callback_id"].as_i64().unwrap();
        self.respond_to(id, data).await;
    }

    pub async fn respond_to(&mut self, callback_id: i64, data: Value) {
        self.send_raw(json!({ "callback_id": callback_id, "data": data }).to_string())
            .await;
    }

    /// Push an event batch; `events` is the `data` array.
    pub async fn push_events(&mut self, events: Value) {
        self.send_raw(json!({ "callback_id": -1, "eventList": true, "data": events }).to_string())
            .await;
    }

    pub async fn send_raw(&mut self, text: impl Into<String>) {
        self.ws.send(Message::text(text.into())).await.unwrap();
    }

    /// Close from the server side with a close frame.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Whether the client closed (or dropped) the connection.
    pub async fn is_closed_by_client(&mut self) -> bool {
        match tokio::time::timeout(WAIT, self.ws.next()).await {
            Ok(None | Some(Ok(Message::Close(_)) | Err(_))) => true,
            Ok(Some(Ok(_))) | Err(_) => false,
        }
    }
}
