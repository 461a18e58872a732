//! Shared configuration for replink.
//!
//! TOML profiles with `REPLINK_` environment overrides, API key resolution
//! (env var + plaintext), and translation to `replink_api::Endpoint` and
//! `replink_api::SessionConfig`. The CLI layers its flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use replink_api::{DEFAULT_BACKOFF, DEFAULT_PORT, Endpoint, REQUEST_TIMEOUT, SessionConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found in {}", path.display())]
    UnknownProfile { profile: String, path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Reconnect delays by consecutive failure count.
    #[serde(default = "default_backoff")]
    pub backoff_secs: Vec<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            backoff_secs: default_backoff(),
        }
    }
}

fn default_request_timeout() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}
fn default_backoff() -> Vec<u64> {
    DEFAULT_BACKOFF.iter().map(Duration::as_secs).collect()
}

/// A named Repetier-Server profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Server host name or address.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// API key (plaintext; prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Override the request timeout.
    pub request_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "replink", "replink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("replink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// A missing file is not an error. Environment variables use the `REPLINK_`
/// prefix with `__` between nesting levels, e.g.
/// `REPLINK_PROFILES__LAB__HOST=10.0.0.7`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("REPLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::UnknownProfile {
                profile: name,
                path: config_path(),
            }),
        }
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve an API key from the credential chain (no CLI flag step).
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build an `Endpoint` from a profile, without CLI flag overrides.
pub fn profile_to_endpoint(profile: &Profile, profile_name: &str) -> Result<Endpoint, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    if profile.port == 0 {
        return Err(ConfigError::Validation {
            field: "port".into(),
            reason: "must be between 1 and 65535".into(),
        });
    }

    let api_key = resolve_api_key(profile, profile_name)?;
    Ok(Endpoint::new(profile.host.trim(), profile.port, api_key))
}

/// Session tuning from the global defaults and a profile's overrides.
pub fn session_config(defaults: &Defaults, profile: Option<&Profile>) -> SessionConfig {
    let timeout = profile
        .and_then(|p| p.request_timeout_secs)
        .unwrap_or(defaults.request_timeout_secs);

    SessionConfig {
        request_timeout: Duration::from_secs(timeout.max(1)),
        backoff: defaults
            .backoff_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile(host: &str) -> Profile {
        Profile {
            host: host.into(),
            port: DEFAULT_PORT,
            api_key: None,
            api_key_env: None,
            request_timeout_secs: None,
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let config =
                load_config_from(&jail.directory().join("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.default_profile.as_deref(), Some("default"));
            assert_eq!(config.defaults.request_timeout_secs, 5);
            assert_eq!(config.defaults.backoff_secs, vec![0, 2, 5, 10, 30]);
            assert!(config.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn file_profiles_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                default_profile = "lab"

                [defaults]
                backoff_secs = [1, 3]

                [profiles.lab]
                host = "octopi.local"
                api_key = "k"
                request_timeout_secs = 9
                "#,
            )?;

            let config =
                load_config_from(&jail.directory().join("config.toml")).map_err(|e| e.to_string())?;
            let (name, lab) = config.profile(None).map_err(|e| e.to_string())?;
            assert_eq!(name, "lab");
            assert_eq!(lab.host, "octopi.local");
            assert_eq!(lab.port, 3344);

            let session = session_config(&config.defaults, Some(lab));
            assert_eq!(session.request_timeout, Duration::from_secs(9));
            assert_eq!(
                session.backoff,
                vec![Duration::from_secs(1), Duration::from_secs(3)]
            );
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [profiles.default]
                host = "from-file"
                "#,
            )?;
            jail.set_env("REPLINK_PROFILES__DEFAULT__HOST", "from-env");
            jail.set_env("REPLINK_PROFILES__DEFAULT__PORT", "8080");

            let config =
                load_config_from(&jail.directory().join("config.toml")).map_err(|e| e.to_string())?;
            let (_, profile) = config.profile(None).map_err(|e| e.to_string())?;
            assert_eq!(profile.host, "from-env");
            assert_eq!(profile.port, 8080);
            Ok(())
        });
    }

    #[test]
    fn unknown_profile() {
        let err = Config::default().profile(Some("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile { ref profile, .. } if profile == "nope"));
    }

    #[test]
    fn api_key_env_takes_precedence() {
        Jail::expect_with(|jail| {
            jail.set_env("REPLINK_TEST_KEY", "from-env");
            let mut p = profile("h");
            p.api_key = Some("plain".into());
            p.api_key_env = Some("REPLINK_TEST_KEY".into());

            let key = resolve_api_key(&p, "default").map_err(|e| e.to_string())?;
            assert_eq!(key.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn unset_env_falls_back_to_plaintext() {
        let mut p = profile("h");
        p.api_key = Some("plain".into());
        p.api_key_env = Some("REPLINK_TEST_UNSET_VARIABLE".into());

        let key = resolve_api_key(&p, "default").unwrap();
        assert_eq!(key.expose_secret(), "plain");
    }

    #[test]
    fn no_credentials() {
        let err = resolve_api_key(&profile("h"), "lab").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "lab"));
    }

    #[test]
    fn endpoint_from_profile() {
        let mut p = profile("  makerpi ");
        p.api_key = Some("k".into());
        let endpoint = profile_to_endpoint(&p, "default").unwrap();
        assert_eq!(endpoint.host(), "makerpi");
        assert_eq!(endpoint.port(), 3344);
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut p = profile("");
        p.api_key = Some("k".into());
        let err = profile_to_endpoint(&p, "default").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "host"));
    }
}
