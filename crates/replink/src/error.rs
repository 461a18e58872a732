//! CLI error types with miette diagnostics.
//!
//! Maps `replink_api::Error` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use replink_api::ErrorKind;
use replink_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const PROTOCOL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to Repetier-Server at {server}: {reason}")]
    #[diagnostic(
        code(replink::connection_failed),
        help("Check that the server is running and reachable, and that the port is right.")
    )]
    ConnectionFailed { server: String, reason: String },

    #[error("No login within {seconds}s")]
    #[diagnostic(
        code(replink::timeout),
        help("Increase the wait with --timeout or check the server's responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Server answers ───────────────────────────────────────────────

    #[error("Authentication failed")]
    #[diagnostic(
        code(replink::auth_failed),
        help(
            "The server refused the API key of profile '{profile}'.\n\
             Find the key under Global Settings > Connectivity on the server."
        )
    )]
    AuthFailed { profile: String },

    #[error("Server refused '{action}'")]
    #[diagnostic(code(replink::rejected))]
    Rejected { action: String },

    #[error("Upload rejected with HTTP {status}")]
    #[diagnostic(
        code(replink::upload_rejected),
        help("Check that the printer slug exists: replink printers")
    )]
    UploadRejected { status: u16 },

    #[error(transparent)]
    #[diagnostic(code(replink::api))]
    Api(replink_api::Error),

    // ── Configuration ────────────────────────────────────────────────

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(replink::no_credentials),
        help(
            "Set api_key or api_key_env in the profile,\n\
             or pass --api-key / set REPLINK_API_KEY."
        )
    )]
    NoCredentials { profile: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(replink::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(replink::no_config),
        help(
            "Pass --host and --api-key, or create a profile.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(replink::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(replink::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(replink::json), help("--data expects a JSON object, e.g. '{{\"cmd\":\"G28\"}}'"))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::Json(_) => exit_code::USAGE,
            Self::Api(e) => match e.kind() {
                ErrorKind::Transport => exit_code::CONNECTION,
                ErrorKind::Timeout => exit_code::TIMEOUT,
                ErrorKind::ProtocolViolation => exit_code::PROTOCOL,
                _ => exit_code::GENERAL,
            },
            _ => exit_code::GENERAL,
        }
    }
}

// ── Library errors → CliError ────────────────────────────────────────

impl From<replink_api::Error> for CliError {
    fn from(err: replink_api::Error) -> Self {
        match err {
            replink_api::Error::NotOk { action } => CliError::Rejected { action },
            replink_api::Error::ServerError { status } => CliError::UploadRejected { status },
            replink_api::Error::Io(e) => CliError::Io(e),
            other => CliError::Api(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
