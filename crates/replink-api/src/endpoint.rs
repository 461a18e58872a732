// Connection target for both the WebSocket session and the HTTP upload.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

/// Default Repetier-Server HTTP/WebSocket port.
pub const DEFAULT_PORT: u16 = 3344;

/// Path of the WebSocket endpoint on the server.
pub const SOCKET_PATH: &str = "/socket";

/// Immutable server address plus API key.
///
/// Used on every (re)connect attempt and by the upload operation. The key
/// is only exposed when building the login request or the upload header.
#[derive(Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    api_key: SecretString,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, api_key: SecretString) -> Self {
        Self {
            host: host.into(),
            port,
            api_key,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub(crate) fn api_key_str(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// `ws://host:port/socket`
    pub fn socket_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url("ws")?;
        url.set_path(SOCKET_PATH);
        Ok(url)
    }

    /// `http://host:port/printer/model/<slug>` with the slug percent-encoded.
    pub fn upload_url(&self, printer: &str) -> Result<Url, Error> {
        let mut url = self.base_url("http")?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .clear()
            .extend(["printer", "model", printer]);
        Ok(url)
    }

    fn base_url(&self, scheme: &str) -> Result<Url, Error> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Ok(Url::parse(&format!("{scheme}://{host}:{}/", self.port))?)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
