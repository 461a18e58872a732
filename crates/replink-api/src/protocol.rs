//! Wire message shapes for the Repetier-Server WebSocket protocol.
//!
//! Outbound: `{ action, data, printer?, callback_id }`.
//! Inbound response: `{ callback_id: n >= 0, data }`.
//! Inbound event batch: `{ callback_id: -1 | absent, eventList: true, data: [ { event, printer?, data } ] }`.
//!
//! Payloads stay generic (`serde_json::Value`); typed decoding of specific
//! actions happens outside this crate.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── Event names pushed by the server ─────────────────────────────────

pub const EVENT_TEMPERATURE: &str = "temp";
pub const EVENT_PRINTER_LIST_CHANGED: &str = "printerListChanged";
pub const EVENT_CONFIG: &str = "config";
pub const EVENT_MODEL_GROUPS_CHANGED: &str = "modelGroupListChanged";
pub const EVENT_JOBS_CHANGED: &str = "jobsChanged";
pub const EVENT_JOB_STARTED: &str = "jobStarted";
pub const EVENT_JOB_FINISHED: &str = "jobFinished";
pub const EVENT_JOB_KILLED: &str = "jobKilled";

// ── Request ──────────────────────────────────────────────────────────

/// A named outbound action with its payload and optional printer slug.
///
/// The correlation id is not part of the request; the connection assigns
/// it when the message is actually written.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: String,
    data: Map<String, Value>,
    printer: Option<String>,
}

impl Request {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: Map::new(),
            printer: None,
        }
    }

    /// Request scoped to one printer.
    pub fn for_printer(action: impl Into<String>, printer: impl Into<String>) -> Self {
        Self::new(action).with_printer(printer)
    }

    pub fn with_printer(mut self, printer: impl Into<String>) -> Self {
        self.printer = Some(printer.into());
        self
    }

    /// Add one key to the `data` mapping.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace the whole `data` mapping.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn printer(&self) -> Option<&str> {
        self.printer.as_deref()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Serialize with the given correlation id embedded.
    pub fn encode(&self, callback_id: u64) -> Result<String, Error> {
        let envelope = OutboundMessage {
            action: &self.action,
            data: &self.data,
            printer: self.printer.as_deref(),
            callback_id,
        };
        serde_json::to_string(&envelope).map_err(|e| Error::protocol(e.to_string()))
    }
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    action: &'a str,
    data: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    printer: Option<&'a str>,
    callback_id: u64,
}

/// `login` request carrying the API key.
pub(crate) fn login_request(api_key: &str) -> Request {
    Request::new("login").with("apikey", api_key)
}

/// Check the explicit `ok` flag of a response.
///
/// `ok: false` is a [`Error::NotOk`]; a missing or non-boolean flag is a
/// protocol violation.
pub fn check_ok(action: &str, data: &Value) -> Result<(), Error> {
    match data.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => Err(Error::NotOk {
            action: action.to_owned(),
        }),
        None => Err(Error::protocol(format!(
            "response to '{action}' lacks a boolean 'ok' flag"
        ))),
    }
}

// ── Inbound frames ───────────────────────────────────────────────────

/// One unsolicited event from an event batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushEvent {
    pub event: String,
    /// Printer slug the event belongs to; empty for server-wide events.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub printer: String,
    #[serde(default)]
    pub data: Value,
}

/// Server-wide events may carry `"printer": null`.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Response to the request with this correlation id.
    Response { callback_id: u64, data: Value },
    /// Batch of push events, in arrival order.
    Events(Vec<PushEvent>),
    /// Neither a response nor an event list; nothing to do.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default = "no_callback")]
    callback_id: i64,
    #[serde(default, rename = "eventList")]
    event_list: bool,
    #[serde(default)]
    data: Value,
}

fn no_callback() -> i64 {
    -1
}

impl Frame {
    /// Parse one text frame. Malformed documents are protocol violations.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let message: InboundMessage = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("malformed frame: {e}")))?;

        if let Ok(callback_id) = u64::try_from(message.callback_id) {
            return Ok(Self::Response {
                callback_id,
                data: message.data,
            });
        }

        if message.event_list {
            let events: Vec<PushEvent> = serde_json::from_value(message.data)
                .map_err(|e| Error::protocol(format!("malformed event list: {e}")))?;
            return Ok(Self::Events(events));
        }

        Ok(Self::Ignored)
    }
}
