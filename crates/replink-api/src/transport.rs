// Shared transport configuration for building reqwest::Client instances.
//
// Uploads are independent, short-lived HTTP exchanges; each one builds its
// client from this config with the API key injected as a default header.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::endpoint::Endpoint;
use crate::error::Error;

/// Vendor header carrying the API key on HTTP requests.
pub const API_KEY_HEADER: &str = "x-api-key";

const USER_AGENT: &str = concat!("replink/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Whole-request bound; `None` lets large uploads run as long as they need.
    pub timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` with additional default headers.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(builder.build()?)
    }

    /// Build a client that authenticates against `endpoint` via `x-api-key`.
    pub fn build_client_for(&self, endpoint: &Endpoint) -> Result<reqwest::Client, Error> {
        let mut key = HeaderValue::from_str(endpoint.api_key_str())
            .map_err(|_| Error::protocol("API key is not a valid header value"))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        self.build_client_with_headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn rejects_key_with_newline() {
        let endpoint = Endpoint::new("h", 1, SecretString::from("bad\nkey".to_owned()));
        let err = TransportConfig::default().build_client_for(&endpoint).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn user_agent_names_crate() {
        assert!(USER_AGENT.starts_with("replink/"));
    }
}
