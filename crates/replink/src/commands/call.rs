//! `replink send` and `replink call`

use serde_json::{Map, Value};

use replink_api::{Request, Session};

use crate::cli::{CallArgs, GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle_send(
    args: &SendArgs,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let response = session.send_command(&args.printer, &args.gcode).await?;
    output::print(&response, global.output);
    Ok(())
}

pub async fn handle_call(
    args: &CallArgs,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let request = build_request(args)?;
    let response = session.request(request).await?;
    output::print(&response, global.output);
    Ok(())
}

fn build_request(args: &CallArgs) -> Result<Request, CliError> {
    let data = match args.data.as_deref() {
        Some(raw) => parse_data(raw)?,
        None => Map::new(),
    };

    let request = Request::new(args.action.as_str()).with_data(data);
    Ok(match args.printer {
        Some(ref printer) => request.with_printer(printer.as_str()),
        None => request,
    })
}

fn parse_data(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: "--data".into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}
