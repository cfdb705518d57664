use atty::Stream;
use color_eyre::Result;
use lamb_core::{format_status_message, to_json_response, CommandStatus, ExecutionOutcome, GlobalOptions};
use serde_json::Value;

use crate::style::Style;

/// Detail fields worth a line of their own in human output, in display order.
const SUMMARY_FIELDS: &[&str] = &[
    "layer_version_arn",
    "arn",
    "storage_key",
    "key",
    "digest",
    "version",
    "statement_id",
];

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

impl OutputOptions {
    pub fn new(global: &GlobalOptions, no_color: bool) -> Self {
        Self {
            quiet: global.quiet,
            json: global.json,
            no_color,
        }
    }
}

pub fn emit_output(opts: &OutputOptions, command: &str, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if opts.json {
        let payload = to_json_response(command, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style_out = Style::new(opts.no_color, atty::is(Stream::Stdout));
    let style_err = Style::new(opts.no_color, atty::is(Stream::Stderr));
    let message = format_status_message(command, &outcome.message);
    match outcome.status {
        CommandStatus::Ok => {
            if !opts.quiet {
                println!("{}", style_out.status(&outcome.status, &message));
                for line in summary_lines(&style_out, &outcome.details) {
                    println!("{line}");
                }
            }
        }
        CommandStatus::UserError | CommandStatus::Failure => {
            eprintln!("{}", style_err.status(&outcome.status, &message));
            for cause in causes(&outcome.details, &outcome.message) {
                eprintln!("  caused by: {cause}");
            }
            if let Some(hint) = hint_from_details(&outcome.details) {
                eprintln!("{}", style_err.info(&format!("Hint: {hint}")));
            }
        }
    }
    Ok(code)
}

fn summary_lines(style: &Style, details: &Value) -> Vec<String> {
    let Some(map) = details.as_object() else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for field in SUMMARY_FIELDS {
        match map.get(*field) {
            Some(Value::String(value)) => lines.push(style.field(field, value)),
            Some(Value::Number(value)) => lines.push(style.field(field, &value.to_string())),
            _ => {}
        }
    }
    lines
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

/// Error chain entries below the top-level message.
fn causes<'a>(details: &'a Value, message: &str) -> Vec<&'a str> {
    details
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(Value::as_str)
                .filter(|error| *error != message)
                .collect()
        })
        .unwrap_or_default()
}
