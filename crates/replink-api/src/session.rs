//! Reconnect-resilient, queued request API on top of a disposable
//! [`Connection`].
//!
//! The [`Session`] handle talks to a background task that owns the live
//! connection, the outbound queue, the subscription table and the
//! reconnect timer. Every notice coming back from a connection is tagged
//! with the generation it was created for, so results of a connection that
//! has already been discarded are ignored.
//!
//! ```text
//! Disconnected ──timer──▶ Connecting ──handshake──▶ AwaitingLogin ──ok──▶ Connected
//!       ▲                     │                          │                   │
//!       └──────────────── any error (backoff armed) ─────┴───────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{self, Connection, REQUEST_TIMEOUT};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::protocol::{PushEvent, Request, check_ok, login_request};
use crate::upload::{ModelIdent, upload_model};

/// Reconnect delays indexed by consecutive failures; saturates at the end.
pub const DEFAULT_BACKOFF: [Duration; 5] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

type EventHandler = Arc<dyn Fn(&str, &Value) + Send + Sync + 'static>;
type DisconnectHandler = Arc<dyn Fn(&Error) + Send + Sync + 'static>;
type LoginHandler = Arc<dyn Fn() + Send + Sync + 'static>;
type ResponseHandler = Box<dyn FnOnce(Value) + Send + 'static>;

// ── SessionState ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingLogin,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingLogin => "awaiting login",
            Self::Connected => "connected",
        })
    }
}

// ── SessionConfig ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window within which each request must be answered. Default: 5s.
    pub request_timeout: Duration,

    /// Reconnect delay per consecutive failure count. Default: 0, 2, 5, 10, 30s.
    pub backoff: Vec<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

/// Delay before the next connect attempt after `failures` consecutive
/// failures (counted before this one).
pub fn retry_delay(backoff: &[Duration], failures: usize) -> Duration {
    backoff
        .get(failures)
        .or_else(|| backoff.last())
        .copied()
        .unwrap_or_default()
}

// ── Session handle ───────────────────────────────────────────────────

enum SessionCommand {
    Submit {
        request: Request,
        handler: ResponseHandler,
    },
    Subscribe {
        event: String,
        handler: EventHandler,
    },
    OnDisconnect(DisconnectHandler),
    OnLogin(LoginHandler),
}

/// Handle to a running session.
///
/// Cheaply cloneable. The background task stops when [`shutdown`](Self::shutdown)
/// is called or every handle has been dropped.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    endpoint: Endpoint,
}

impl Session {
    /// Start a session with the default configuration.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::builder(endpoint).start()
    }

    /// Spawn the session task; the first connect attempt starts immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(endpoint: Endpoint, config: SessionConfig) -> Self {
        Self::builder(endpoint).config(config).start()
    }

    /// Configure handlers that must be in place before the first attempt.
    pub fn builder(endpoint: Endpoint) -> SessionBuilder {
        SessionBuilder {
            endpoint,
            config: SessionConfig::default(),
            subscriptions: HashMap::new(),
            on_disconnect: Vec::new(),
            on_login: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Queue `request`; `handler` receives the response payload.
    ///
    /// Requests are sent one at a time in submission order once the session
    /// is logged in. A request that is on the wire when the connection dies
    /// is lost: its handler is dropped without being called.
    pub fn submit(
        &self,
        request: Request,
        handler: impl FnOnce(Value) + Send + 'static,
    ) -> Result<(), Error> {
        self.command(SessionCommand::Submit {
            request,
            handler: Box::new(handler),
        })
    }

    /// Queue `request` and wait for its response payload.
    pub async fn request(&self, request: Request) -> Result<Value, Error> {
        let (tx, rx) = oneshot::channel();
        self.submit(request, move |data| {
            let _ = tx.send(data);
        })?;
        rx.await.map_err(|_| {
            if self.cancel.is_cancelled() || self.commands.is_closed() {
                Error::SessionClosed
            } else {
                Error::Disconnected
            }
        })
    }

    /// Add a handler for a named push event. Handlers survive reconnects.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> Result<(), Error> {
        self.command(SessionCommand::Subscribe {
            event: event.into(),
            handler: Arc::new(handler),
        })
    }

    /// Add a handler that runs on every teardown, with the cause.
    pub fn on_disconnect(&self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Result<(), Error> {
        self.command(SessionCommand::OnDisconnect(Arc::new(handler)))
    }

    /// Add a handler that runs after every successful login.
    pub fn on_login(&self, handler: impl Fn() + Send + Sync + 'static) -> Result<(), Error> {
        self.command(SessionCommand::OnLogin(Arc::new(handler)))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolve once the session is logged in.
    pub async fn wait_connected(&self) -> Result<(), Error> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == SessionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| Error::SessionClosed)
    }

    /// Upload a model file. Runs on its own HTTP exchange, outside the queue.
    pub async fn upload(&self, model: &ModelIdent, path: impl AsRef<Path>) -> Result<(), Error> {
        upload_model(&self.endpoint, model, path.as_ref()).await
    }

    /// Close the live connection, drop queued requests and stop reconnecting.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, command: SessionCommand) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

// ── SessionBuilder ───────────────────────────────────────────────────

/// Session setup with handlers registered ahead of the first connect.
///
/// Handlers added through the [`Session`] handle after `start` race the
/// first attempt; these do not.
pub struct SessionBuilder {
    endpoint: Endpoint,
    config: SessionConfig,
    subscriptions: HashMap<String, Vec<EventHandler>>,
    on_disconnect: Vec<DisconnectHandler>,
    on_login: Vec<LoginHandler>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscribe(
        mut self,
        event: impl Into<String>,
        handler: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.subscriptions
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn on_disconnect(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_disconnect.push(Arc::new(handler));
        self
    }

    pub fn on_login(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_login.push(Arc::new(handler));
        self
    }

    /// Spawn the session task; the first connect attempt starts immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Session {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let cancel = CancellationToken::new();

        let task = SessionTask {
            endpoint: self.endpoint.clone(),
            config: self.config,
            state: state_tx,
            notices,
            cancel: cancel.clone(),
            connection: None,
            generation: 0,
            failures: 0,
            queue: VecDeque::new(),
            in_flight: None,
            reconnect_at: None,
            subscriptions: self.subscriptions,
            on_disconnect: self.on_disconnect,
            on_login: self.on_login,
        };
        tokio::spawn(task.run(command_rx, notice_rx));

        Session {
            commands,
            state,
            cancel,
            endpoint: self.endpoint,
        }
    }
}

// ── Background task ──────────────────────────────────────────────────

/// Notices from a connection back to the session task.
enum Notice {
    Handshaked { generation: u64 },
    Completed { generation: u64, data: Value },
    Failed { generation: u64, error: Error },
    Event { generation: u64, event: PushEvent },
}

enum Reply {
    Login,
    Caller(ResponseHandler),
}

struct Queued {
    request: Request,
    reply: Reply,
}

impl Queued {
    fn is_login(&self) -> bool {
        matches!(self.reply, Reply::Login)
    }
}

struct InFlight {
    action: String,
    reply: Reply,
}

struct SessionTask {
    endpoint: Endpoint,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    notices: mpsc::UnboundedSender<Notice>,
    cancel: CancellationToken,
    connection: Option<Connection>,
    generation: u64,
    failures: usize,
    queue: VecDeque<Queued>,
    in_flight: Option<InFlight>,
    reconnect_at: Option<Instant>,
    subscriptions: HashMap<String, Vec<EventHandler>>,
    on_disconnect: Vec<DisconnectHandler>,
    on_login: Vec<LoginHandler>,
}

impl SessionTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut notices: mpsc::UnboundedReceiver<Notice>,
    ) {
        self.connect();

        loop {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(notice) = notices.recv() => self.on_notice(notice),
                () = connection::sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        self.stop();
    }

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Submit { request, handler } => {
                debug!(action = request.action(), queued = self.queue.len(), "request queued");
                self.queue.push_back(Queued {
                    request,
                    reply: Reply::Caller(handler),
                });
                self.advance();
            }
            SessionCommand::Subscribe { event, handler } => {
                let handlers = self.subscriptions.entry(event.clone()).or_default();
                let first = handlers.is_empty();
                handlers.push(handler);
                if first {
                    if let Some(connection) = &self.connection {
                        let forward = forward_events(self.notices.clone(), self.generation, event.clone());
                        connection.subscribe(event, forward);
                    }
                }
            }
            SessionCommand::OnDisconnect(handler) => self.on_disconnect.push(handler),
            SessionCommand::OnLogin(handler) => self.on_login.push(handler),
        }
    }

    fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Handshaked { generation } if generation == self.generation => {
                self.on_handshaked();
            }
            Notice::Completed { generation, data } if generation == self.generation => {
                self.on_completed(data);
            }
            Notice::Failed { generation, error } if generation == self.generation => {
                self.fail(error);
            }
            Notice::Event { generation, event } if generation == self.generation => {
                if let Some(handlers) = self.subscriptions.get(&event.event) {
                    for handler in handlers {
                        handler(&event.printer, &event.data);
                    }
                }
            }
            _ => debug!("notice from a discarded connection ignored"),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    fn connect(&mut self) {
        info!("initiating connection to server");

        self.generation += 1;
        let generation = self.generation;
        self.set_state(SessionState::Connecting);

        let notices = self.notices.clone();
        let mut connection = Connection::with_timeout(self.config.request_timeout, move |error| {
            let _ = notices.send(Notice::Failed { generation, error });
        });

        for event in self.subscriptions.keys() {
            let forward = forward_events(self.notices.clone(), generation, event.clone());
            connection.subscribe(event.clone(), forward);
        }

        let notices = self.notices.clone();
        let started = connection.connect(&self.endpoint, move || {
            let _ = notices.send(Notice::Handshaked { generation });
        });
        self.connection = Some(connection);

        if let Err(e) = started {
            self.fail(e);
        }
    }

    fn on_handshaked(&mut self) {
        debug!("sending login request");
        self.set_state(SessionState::AwaitingLogin);
        self.queue.push_front(Queued {
            request: login_request(self.endpoint.api_key_str()),
            reply: Reply::Login,
        });
        self.advance();
    }

    fn on_logged_in(&mut self) {
        info!("successfully connected and logged in");
        self.failures = 0;
        self.set_state(SessionState::Connected);
        for handler in &self.on_login {
            handler();
        }
    }

    /// Tear down the live connection and arm the reconnect timer.
    fn fail(&mut self, error: Error) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        // Anything still in flight from the old connection is now stale.
        self.generation += 1;

        if let Some(lost) = self.in_flight.take() {
            warn!(action = %lost.action, "request lost with the connection");
        }
        self.queue.retain(|queued| !queued.is_login());
        self.set_state(SessionState::Disconnected);

        for handler in &self.on_disconnect {
            handler(&error);
        }

        let delay = retry_delay(&self.config.backoff, self.failures);
        self.failures = self.failures.saturating_add(1);

        error!(
            error = %error,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            failures = self.failures,
            "error in server communication, reconnecting"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.generation += 1;
        self.in_flight = None;
        self.queue.clear();
        self.reconnect_at = None;
        self.set_state(SessionState::Disconnected);
        info!("session stopped");
    }

    // ── Queue ────────────────────────────────────────────────────────

    /// Hand the head of the queue to the connection if it may be sent now.
    ///
    /// The login request may go out before the session is `Connected`;
    /// everything else waits for a successful login.
    fn advance(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let (Some(connection), Some(head)) = (&self.connection, self.queue.front()) else {
            return;
        };
        if !head.is_login() && *self.state.borrow() != SessionState::Connected {
            return;
        }

        let notices = self.notices.clone();
        let generation = self.generation;
        let sent = connection.send(head.request.clone(), move |data| {
            let _ = notices.send(Notice::Completed { generation, data });
        });

        match sent {
            Ok(()) => {
                if let Some(Queued { request, reply }) = self.queue.pop_front() {
                    self.in_flight = Some(InFlight {
                        action: request.action().to_owned(),
                        reply,
                    });
                }
            }
            Err(e) => warn!(error = %e, "connection did not accept the request"),
        }
    }

    fn on_completed(&mut self, data: Value) {
        let Some(InFlight { action, reply }) = self.in_flight.take() else {
            warn!("response without a request in flight");
            return;
        };

        match reply {
            Reply::Login => match check_ok(&action, &data) {
                Ok(()) => self.on_logged_in(),
                Err(e) => return self.fail(e),
            },
            Reply::Caller(handler) => handler(data),
        }

        self.advance();
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state changed");
        }
    }
}

/// Connection-side event handler that forwards into the session task.
fn forward_events(
    notices: mpsc::UnboundedSender<Notice>,
    generation: u64,
    event: String,
) -> impl Fn(&str, &Value) + Send + Sync + 'static {
    move |printer: &str, data: &Value| {
        let _ = notices.send(Notice::Event {
            generation,
            event: PushEvent {
                event: event.clone(),
                printer: printer.to_owned(),
                data: data.clone(),
            },
        });
    }
}
