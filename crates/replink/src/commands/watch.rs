//! `replink watch`

use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use replink_api::Session;
use replink_api::protocol::{
    EVENT_CONFIG, EVENT_JOB_FINISHED, EVENT_JOB_KILLED, EVENT_JOB_STARTED, EVENT_JOBS_CHANGED,
    EVENT_MODEL_GROUPS_CHANGED, EVENT_PRINTER_LIST_CHANGED, EVENT_TEMPERATURE,
};

use crate::cli::{OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

const DEFAULT_EVENTS: [&str; 8] = [
    EVENT_TEMPERATURE,
    EVENT_PRINTER_LIST_CHANGED,
    EVENT_CONFIG,
    EVENT_MODEL_GROUPS_CHANGED,
    EVENT_JOBS_CHANGED,
    EVENT_JOB_STARTED,
    EVENT_JOB_FINISHED,
    EVENT_JOB_KILLED,
];

/// Print one line per event until Ctrl-C. Reconnects are handled by the
/// session; subscriptions carry over.
pub async fn handle(args: &WatchArgs, session: &Session) -> Result<(), CliError> {
    let events: Vec<String> = if args.events.is_empty() {
        DEFAULT_EVENTS.iter().map(|e| (*e).to_owned()).collect()
    } else {
        args.events.clone()
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    for event in events {
        let tx = tx.clone();
        let name = event.clone();
        session.subscribe(event, move |printer, data| {
            let _ = tx.send(json!({ "event": name, "printer": printer, "data": data }));
        })?;
    }
    drop(tx);

    session.on_disconnect(|e| warn!(error = %e, "connection lost, reconnecting"))?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                // One event per line.
                Some(event) => output::print(&event, OutputFormat::JsonCompact),
                None => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                session.shutdown();
                return Ok(());
            }
        }
    }
}
