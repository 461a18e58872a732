//! One physical WebSocket session with a strict one-request-at-a-time
//! discipline.
//!
//! A [`Connection`] is a handle to a background task that owns the socket,
//! the single pending-call slot and the subscription table. The task keeps
//! exactly one read outstanding, writes requests handed to it by the
//! handle, arms a timeout per request and demultiplexes inbound frames
//! into either the pending response handler or the named event handlers.
//!
//! A connection is never reused: once its error handler has reported a
//! transport failure the owner discards it and builds a new one.
//!
//! ```rust,ignore
//! let mut conn = Connection::new(|err| tracing::warn!(%err, "connection failed"));
//! conn.subscribe("temp", |printer, data| println!("{printer}: {data}"));
//! conn.connect(&endpoint, || tracing::info!("handshake done"))?;
//! conn.send(Request::new("listPrinter"), |data| println!("{data}"))?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::protocol::{Frame, PushEvent, Request};

/// Fixed window within which a response must arrive.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the closing handshake during an orderly shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type ResponseHandler = Box<dyn FnOnce(Value) + Send + 'static>;
type EventHandler = Box<dyn Fn(&str, &Value) + Send + Sync + 'static>;
type ErrorHandler = Box<dyn Fn(Error) + Send + Sync + 'static>;

enum Command {
    Send {
        request: Request,
        on_response: ResponseHandler,
    },
    Subscribe {
        event: String,
        handler: EventHandler,
    },
}

// ── Connection handle ────────────────────────────────────────────────

/// Handle to a single WebSocket session.
///
/// Dropping the handle closes the connection without reporting an error.
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    pending_commands: Option<mpsc::UnboundedReceiver<Command>>,
    on_error: Option<ErrorHandler>,
    in_flight: Arc<AtomicBool>,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl Connection {
    /// Create an unconnected handle with the default request timeout.
    ///
    /// `on_error` receives transport failures (exactly once, after which the
    /// task stops) and request timeouts (after which the slot is free again).
    pub fn new(on_error: impl Fn(Error) + Send + Sync + 'static) -> Self {
        Self::with_timeout(REQUEST_TIMEOUT, on_error)
    }

    pub fn with_timeout(
        request_timeout: Duration,
        on_error: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        let (commands, pending_commands) = mpsc::unbounded_channel();
        Self {
            commands,
            pending_commands: Some(pending_commands),
            on_error: Some(Box::new(on_error)),
            in_flight: Arc::new(AtomicBool::new(false)),
            request_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve, connect and perform the WebSocket handshake in the
    /// background. `on_success` runs once the handshake completes, right
    /// before the read loop starts.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        &mut self,
        endpoint: &Endpoint,
        on_success: impl FnOnce() + Send + 'static,
    ) -> Result<(), Error> {
        let (Some(commands), Some(on_error)) = (self.pending_commands.take(), self.on_error.take())
        else {
            return Err(Error::AlreadyConnected);
        };

        let task = ConnectionTask {
            commands,
            on_error,
            in_flight: Arc::clone(&self.in_flight),
            request_timeout: self.request_timeout,
            cancel: self.cancel.clone(),
            subscriptions: HashMap::new(),
            pending: None,
            last_callback_id: 0,
        };
        tokio::spawn(task.run(endpoint.clone(), on_success));
        Ok(())
    }

    /// Write `request` with the next correlation id and arm its timeout.
    ///
    /// Only one request may await a response at a time; a second call
    /// before the first is answered (or timed out) fails with
    /// [`Error::RequestInFlight`].
    pub fn send(
        &self,
        request: Request,
        on_response: impl FnOnce(Value) + Send + 'static,
    ) -> Result<(), Error> {
        if self.pending_commands.is_some() {
            return Err(Error::NotConnected);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::RequestInFlight);
        }

        let command = Command::Send {
            request,
            on_response: Box::new(on_response),
        };
        self.commands.send(command).map_err(|_| {
            self.in_flight.store(false, Ordering::Release);
            Error::NotConnected
        })
    }

    /// Register (or replace) the handler for one event name.
    ///
    /// The handler receives the originating printer slug (empty for
    /// server-wide events) and the event payload.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) {
        let command = Command::Subscribe {
            event: event.into(),
            handler: Box::new(handler),
        };
        if self.commands.send(command).is_err() {
            trace!("subscribe on a stopped connection ignored");
        }
    }

    /// Whether a request is currently awaiting its response.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start an orderly shutdown. Errors caused by the shutdown itself are
    /// not reported.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background task ──────────────────────────────────────────────────

struct Pending {
    callback_id: u64,
    handler: ResponseHandler,
    deadline: Instant,
}

struct ConnectionTask {
    commands: mpsc::UnboundedReceiver<Command>,
    on_error: ErrorHandler,
    in_flight: Arc<AtomicBool>,
    request_timeout: Duration,
    cancel: CancellationToken,
    subscriptions: HashMap<String, EventHandler>,
    pending: Option<Pending>,
    last_callback_id: u64,
}

impl ConnectionTask {
    async fn run(mut self, endpoint: Endpoint, on_success: impl FnOnce()) {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("connect cancelled");
                return;
            }
            result = open(&endpoint) => result,
        };

        let ws = match opened {
            Ok(ws) => ws,
            Err(e) => return self.fail(e),
        };

        debug!("connection successfully established");
        on_success();

        let (mut sink, mut source) = ws.split();
        match self.drive(&mut sink, &mut source).await {
            Ok(()) => {
                info!("closing connection to server");
                self.clear_pending();
                if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                    debug!("closing handshake did not finish in time");
                }
            }
            Err(_) if self.cancel.is_cancelled() => self.clear_pending(),
            Err(e) => self.fail(e),
        }
    }

    /// Read loop. Returns `Ok` on an intentional close, `Err` on failure.
    async fn drive(&mut self, sink: &mut WsSink, source: &mut WsSource) -> Result<(), Error> {
        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                // Local commands first, so a subscription made before a
                // frame arrives is in place when it is dispatched.
                command = self.commands.recv() => match command {
                    Some(Command::Send { request, on_response }) => {
                        self.write(sink, request, on_response).await?;
                    }
                    Some(Command::Subscribe { event, handler }) => {
                        self.subscriptions.insert(event, handler);
                    }
                    // Handle dropped.
                    None => return Ok(()),
                },
                frame = source.next() => self.on_frame(frame)?,
                () = sleep_until(deadline) => self.on_timeout(),
            }
        }
    }

    async fn write(
        &mut self,
        sink: &mut WsSink,
        request: Request,
        on_response: ResponseHandler,
    ) -> Result<(), Error> {
        if let Some(pending) = &self.pending {
            error!(
                callback_id = pending.callback_id,
                action = request.action(),
                "request dropped: another request is still pending"
            );
            return Ok(());
        }

        self.last_callback_id += 1;
        let callback_id = self.last_callback_id;
        let text = request.encode(callback_id)?;

        debug!(callback_id, action = request.action(), ">>>");
        sink.send(Message::text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        self.pending = Some(Pending {
            callback_id,
            handler: on_response,
            deadline: Instant::now() + self.request_timeout,
        });
        Ok(())
    }

    fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> Result<(), Error> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                debug!(frame = text.as_str(), "<<<");
                self.dispatch(Frame::parse(text.as_str())?);
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => Err(match frame {
                Some(cf) => Error::ConnectionClosed {
                    code: Some(u16::from(cf.code)),
                    reason: cf.reason.as_str().to_owned(),
                },
                None => Error::ConnectionClosed {
                    code: None,
                    reason: "close frame without payload".into(),
                },
            }),
            Some(Ok(Message::Binary(bytes))) => {
                debug!(len = bytes.len(), "ignoring binary frame");
                Ok(())
            }
            // Ping/Pong/raw frames; tungstenite answers pings itself.
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(Error::WebSocket(e.to_string())),
            None => Err(Error::ConnectionClosed {
                code: None,
                reason: "stream ended".into(),
            }),
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Response { callback_id, data } => self.resolve(callback_id, data),
            Frame::Events(events) => {
                for event in events {
                    self.deliver(&event);
                }
            }
            Frame::Ignored => trace!("frame is neither a response nor an event list"),
        }
    }

    fn resolve(&mut self, callback_id: u64, data: Value) {
        match self.pending.take() {
            None => {
                warn!(callback_id, "received callback although no request is pending");
            }
            Some(pending) if pending.callback_id != callback_id => {
                warn!(
                    callback_id,
                    expected = pending.callback_id,
                    "received callback for a request that is not pending"
                );
                self.pending = Some(pending);
            }
            Some(pending) => {
                // Taking the slot disarmed the timer; free it before the
                // handler runs so it may send the next request.
                self.in_flight.store(false, Ordering::Release);
                (pending.handler)(data);
            }
        }
    }

    fn deliver(&self, event: &PushEvent) {
        match self.subscriptions.get(&event.event) {
            Some(handler) => handler(&event.printer, &event.data),
            None => trace!(event = %event.event, "no subscriber for event"),
        }
    }

    fn on_timeout(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.in_flight.store(false, Ordering::Release);

        let timeout_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
        error!(callback_id = pending.callback_id, timeout_ms, "timeout waiting for callback");
        (self.on_error)(Error::Timeout {
            callback_id: pending.callback_id,
            timeout_ms,
        });
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.in_flight.store(false, Ordering::Release);
    }

    fn fail(mut self, error: Error) {
        self.clear_pending();
        error!(error = %error, "error communicating with server");
        (self.on_error)(error);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Resolve, connect and run the client handshake against `/socket`.
async fn open(endpoint: &Endpoint) -> Result<WsStream, Error> {
    info!(host = endpoint.host(), port = endpoint.port(), "connecting to server");

    let tcp = TcpStream::connect((endpoint.host(), endpoint.port()))
        .await
        .map_err(|e| Error::Connect {
            host: endpoint.host().to_owned(),
            port: endpoint.port(),
            reason: e.to_string(),
        })?;
    tcp.set_nodelay(true)?;

    let url = endpoint.socket_url()?;
    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocket(e.to_string()))?;

    let (ws, _response) = tokio_tungstenite::client_async(ClientRequestBuilder::new(uri), tcp)
        .await
        .map_err(handshake_error)?;
    Ok(ws)
}

/// A rejected or malformed upgrade is the server not speaking the protocol.
fn handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(_) | tungstenite::Error::Protocol(_) => {
            Error::protocol(format!("handshake rejected: {err}"))
        }
        other => Error::WebSocket(other.to_string()),
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
