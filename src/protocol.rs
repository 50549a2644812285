//! Line-delimited JSON framing for the host binary.
//!
//! A request is a command object, optionally carrying the caller it is issued
//! on behalf of:
//!
//! ```json
//! {"command":"StartPlugin","plugin":"weather"}
//! {"caller":"plugin:weather","command":"SetPluginData","plugin":"weather","key":"apiKey","value":"abc"}
//! ```
//!
//! Every request is answered with exactly one [`Response`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::Command;
use crate::dispatcher::CommandOutcome;
use crate::error::PluginResult;
use crate::permission::{CallerIdentity, ParseIdentityError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid caller: {0}")]
    Caller(#[from] ParseIdentityError),
}

impl ProtocolError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "InvalidRequest",
            ProtocolError::Caller(_) => "InvalidCaller",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Caller named by the request, or `default` when it names none.
    pub fn caller_or(&self, default: &CallerIdentity) -> Result<CallerIdentity, ProtocolError> {
        match &self.caller {
            Some(caller) => Ok(caller.parse()?),
            None => Ok(default.clone()),
        }
    }
}

pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn decode_command(line: &str) -> Result<Command, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    pub fn success(outcome: CommandOutcome) -> Self {
        Self {
            success: true,
            result: Some(outcome),
            error_type: None,
            error_message: None,
        }
    }

    pub fn failure(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error_type: Some(error_type.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"errorType":"Internal","errorMessage":"{e}"}}"#)
        })
    }
}

impl From<PluginResult<CommandOutcome>> for Response {
    fn from(result: PluginResult<CommandOutcome>) -> Self {
        match result {
            Ok(outcome) => Response::success(outcome),
            Err(e) => Response::failure(e.error_type(), e.to_string()),
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(e: ProtocolError) -> Self {
        Response::failure(e.error_type(), e.to_string())
    }
}
