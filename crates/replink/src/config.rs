//! CLI configuration: a thin wrapper around `replink_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--host, --port, --api-key).

use secrecy::SecretString;

use replink_api::{DEFAULT_PORT, Endpoint, SessionConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use replink_config::{Config, Profile, config_path, load_config};

/// Endpoint plus session tuning for one invocation.
pub struct Resolved {
    pub profile: String,
    pub endpoint: Endpoint,
    pub session: SessionConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the endpoint from the config file, profile, and CLI overrides.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config()?;
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        let endpoint = resolve_profile(profile, &profile_name, global)?;
        return Ok(Resolved {
            session: replink_config::session_config(&cfg.defaults, Some(profile)),
            profile: profile_name,
            endpoint,
        });
    }

    // An explicitly named profile must exist.
    if global.profile.is_some() {
        let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
        available.sort();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available.join(", ")
            },
        });
    }

    // No profile -- build from CLI flags / env vars alone.
    let host = global.host.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let api_key = global.api_key.clone().ok_or_else(|| CliError::NoCredentials {
        profile: profile_name.clone(),
    })?;

    Ok(Resolved {
        endpoint: Endpoint::new(
            host,
            global.port.unwrap_or(DEFAULT_PORT),
            SecretString::from(api_key),
        ),
        session: replink_config::session_config(&cfg.defaults, None),
        profile: profile_name,
    })
}

/// Translate a `Profile` + global flags into an `Endpoint`.
///
/// CLI flag overrides take priority over profile values.
fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<Endpoint, CliError> {
    let host = global.host.as_deref().unwrap_or(&profile.host).trim();
    if host.is_empty() {
        return Err(CliError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    let port = global.port.unwrap_or(profile.port);

    let api_key = match global.api_key {
        Some(ref key) => SecretString::from(key.clone()),
        None => replink_config::resolve_api_key(profile, profile_name)?,
    };

    Ok(Endpoint::new(host, port, api_key))
}
