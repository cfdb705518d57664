use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::diagnostics::codes;
use crate::error::deploy_error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Renders an operation error. Known deployment errors keep their code and
    /// hint; anything else is reported as a generic failure.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        match deploy_error(err) {
            Some(deploy) => {
                let mut details = json!({
                    "code": deploy.code(),
                    "errors": chain,
                });
                if let Some(hint) = deploy.hint() {
                    details["hint"] = json!(hint);
                }
                if deploy.is_user_error() {
                    Self::user_error(deploy.to_string(), details)
                } else {
                    Self::failure(deploy.to_string(), details)
                }
            }
            None => Self::failure(
                err.to_string(),
                json!({ "code": codes::GENERIC, "errors": chain }),
            ),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

#[must_use]
pub fn to_json_response(command: &str, outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(command, &outcome.message),
        "details": details,
    })
}

#[must_use]
pub fn format_status_message(command: &str, message: &str) -> String {
    let prefix = format!("lamb {command}");
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}
