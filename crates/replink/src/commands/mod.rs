//! Command handlers.

pub mod call;
pub mod config_cmd;
pub mod printers;
pub mod upload;
pub mod watch;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use replink_api::{ErrorKind, Session};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;

/// Start a session and wait for its first successful login.
///
/// The first failure is reported instead of being retried, and the whole
/// wait is bounded by `--timeout`.
pub async fn connect(global: &GlobalOpts) -> Result<Session, CliError> {
    let resolved = config::resolve(global)?;
    let server = format!("{}:{}", resolved.endpoint.host(), resolved.endpoint.port());
    debug!(profile = %resolved.profile, %server, "starting session");

    let (tx, mut failures) = mpsc::unbounded_channel();
    let session = Session::builder(resolved.endpoint)
        .config(resolved.session)
        .on_disconnect(move |e| {
            let _ = tx.send((e.kind(), e.to_string()));
        })
        .start();

    tokio::select! {
        connected = session.wait_connected() => connected?,
        Some((kind, reason)) = failures.recv() => {
            session.shutdown();
            return Err(match kind {
                ErrorKind::NotOk => CliError::AuthFailed { profile: resolved.profile },
                _ => CliError::ConnectionFailed { server, reason },
            });
        }
        () = tokio::time::sleep(Duration::from_secs(global.timeout)) => {
            session.shutdown();
            return Err(CliError::Timeout { seconds: global.timeout });
        }
    }

    Ok(session)
}
