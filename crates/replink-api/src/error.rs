use thiserror::Error;

/// Top-level error type for the `replink-api` crate.
///
/// Covers every failure mode of the persistent WebSocket session and the
/// one-shot model upload. Variants are grouped by [`ErrorKind`].
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Name resolution or TCP connect failed.
    #[error("Cannot connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// WebSocket handshake, read or write failed.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The server closed the WebSocket (or the stream ended).
    #[error("Connection closed by server (code {}): {reason}", close_code(*.code))]
    ConnectionClosed { code: Option<u16>, reason: String },

    /// HTTP transport error during upload.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O error (reading the upload file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Protocol ────────────────────────────────────────────────────
    /// No response arrived for a request within the configured window.
    #[error("Request {callback_id} timed out after {timeout_ms}ms")]
    Timeout { callback_id: u64, timeout_ms: u64 },

    /// The server sent a malformed or structurally invalid message.
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A response carried `ok: false`.
    #[error("Server refused '{action}'")]
    NotOk { action: String },

    /// The upload endpoint answered with a status other than 200/204.
    #[error("Upload rejected (HTTP {status})")]
    ServerError { status: u16 },

    // ── Usage / lifecycle ───────────────────────────────────────────
    /// `connect` was called on a connection that was already started.
    #[error("Connection already started")]
    AlreadyConnected,

    /// The connection has not completed its handshake or has stopped.
    #[error("Not connected")]
    NotConnected,

    /// A second request was sent while one is still awaiting its response.
    #[error("A request is already awaiting a response")]
    RequestInFlight,

    /// The request was lost because the connection was torn down.
    #[error("Disconnected before a response arrived")]
    Disconnected,

    /// The session has been shut down.
    #[error("Session closed")]
    SessionClosed,
}

fn close_code(code: Option<u16>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

/// Coarse error category, as seen by retry policy and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Timeout,
    ProtocolViolation,
    NotOk,
    ServerError,
    Usage,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. }
            | Self::WebSocket(_)
            | Self::ConnectionClosed { .. }
            | Self::Http(_)
            | Self::Io(_)
            | Self::InvalidUrl(_)
            | Self::Disconnected => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::NotOk { .. } => ErrorKind::NotOk,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::AlreadyConnected
            | Self::NotConnected
            | Self::RequestInFlight
            | Self::SessionClosed => ErrorKind::Usage,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Connect { .. }
            | Self::WebSocket(_)
            | Self::ConnectionClosed { .. }
            | Self::Timeout { .. }
            | Self::Disconnected => true,
            Self::ServerError { status } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variant_groups() {
        assert_eq!(Error::WebSocket("reset".into()).kind(), ErrorKind::Transport);
        assert_eq!(
            Error::Timeout {
                callback_id: 3,
                timeout_ms: 5000
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::protocol("bad").kind(), ErrorKind::ProtocolViolation);
        assert_eq!(
            Error::NotOk {
                action: "login".into()
            }
            .kind(),
            ErrorKind::NotOk
        );
        assert_eq!(Error::ServerError { status: 404 }.kind(), ErrorKind::ServerError);
        assert_eq!(Error::RequestInFlight.kind(), ErrorKind::Usage);
    }

    #[test]
    fn closed_connection_message_without_code() {
        let err = Error::ConnectionClosed {
            code: None,
            reason: "stream ended".into(),
        };
        assert_eq!(err.to_string(), "Connection closed by server (code none): stream ended");
    }

    #[test]
    fn transient_errors() {
        assert!(Error::Disconnected.is_transient());
        assert!(Error::ServerError { status: 503 }.is_transient());
        assert!(!Error::ServerError { status: 404 }.is_transient());
        assert!(!Error::NotOk { action: "x".into() }.is_transient());
    }
}
