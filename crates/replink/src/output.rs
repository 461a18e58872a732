//! Rendering of response payloads.

use serde_json::Value;

use crate::cli::OutputFormat;

pub fn render(value: &Value, format: OutputFormat) -> String {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value),
        OutputFormat::JsonCompact => serde_json::to_string(value),
    };
    // Serializing a `Value` cannot fail.
    rendered.unwrap_or_default()
}

pub fn print(value: &Value, format: OutputFormat) {
    println!("{}", render(value, format));
}
