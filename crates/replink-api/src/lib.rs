// replink-api: Async Rust client for the Repetier-Server WebSocket protocol and model upload

mod actions;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod multipart;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod upload;

pub use connection::{Connection, REQUEST_TIMEOUT};
pub use endpoint::{DEFAULT_PORT, Endpoint};
pub use error::{Error, ErrorKind};
pub use multipart::{Chunk, MultipartEncoder, MultipartForm};
pub use protocol::{Frame, PushEvent, Request};
pub use session::{
    DEFAULT_BACKOFF, Session, SessionBuilder, SessionConfig, SessionState, retry_delay,
};
pub use upload::{ModelIdent, upload_model};

pub use secrecy::SecretString;
