//! Hostlink command wire protocol.
//!
//! Clients send a JSON command envelope in one of two shapes:
//!
//! - canonical: `{"id": ..., "type": "ping", "parameters": {...}}`
//! - legacy: `{"id": ..., "command": "ping", "args": {...}, "extra": ...}`
//!
//! Both normalize into a single [`CommandEnvelope`]. Every envelope produces
//! exactly one [`CommandResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::marshal::{Marshal, MarshalError};

/// Machine-readable error codes carried in [`CommandResult::error`].
pub mod codes {
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    pub const INVALID_ENVELOPE: &str = "invalid_envelope";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const HANDLER_ERROR: &str = "handler_error";
    pub const HANDLER_PANIC: &str = "handler_panic";
    pub const TIMEOUT: &str = "timeout";
    pub const QUEUE_FULL: &str = "queue_full";
    pub const METHOD_NOT_ALLOWED: &str = "method_not_allowed";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope must be a JSON object with a 'type' or 'command' field")]
    Unrecognized,

    #[error("command name must not be empty")]
    EmptyName,
}

/// The two accepted wire shapes. The canonical shape is tried first.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEnvelope {
    Canonical {
        #[serde(default)]
        id: Option<Value>,
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        parameters: Option<Map<String, Value>>,
    },
    Legacy {
        #[serde(default)]
        id: Option<Value>,
        command: String,
        #[serde(default)]
        args: Option<Map<String, Value>>,
        #[serde(flatten)]
        siblings: Map<String, Value>,
    },
}

/// A normalized command request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    id: Option<String>,
    name: String,
    parameters: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            parameters,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse an envelope from raw request bytes.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    /// Normalize an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|_| ProtocolError::Unrecognized)?;

        let (id, name, parameters) = match wire {
            WireEnvelope::Canonical {
                id,
                kind,
                parameters,
            } => (id, kind, parameters.unwrap_or_default()),
            WireEnvelope::Legacy {
                id,
                command,
                args,
                siblings,
            } => {
                let mut parameters = args.unwrap_or_default();
                for (key, value) in siblings {
                    parameters.entry(key).or_insert(value);
                }
                (id, command, parameters)
            }
        };

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }

        Ok(Self {
            id: id.and_then(normalize_id),
            name,
            parameters,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Command name as sent by the client (original casing).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Coerce a required parameter into `T`.
    pub fn param<T: Marshal>(&self, key: &str) -> Result<T, MarshalError> {
        let raw = self
            .parameters
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| MarshalError::Missing(key.to_string()))?;
        T::from_json(raw).map_err(|e| e.for_field(key))
    }

    /// Coerce an optional parameter into `T`, falling back to `default` when absent or null.
    pub fn param_or<T: Marshal>(&self, key: &str, default: T) -> Result<T, MarshalError> {
        match self.param(key) {
            Err(MarshalError::Missing(_)) => Ok(default),
            other => other,
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

fn normalize_id(id: Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Outcome of executing one command envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    pub fn failure(message: impl Into<String>, code: &str) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code.to_string()),
        }
    }

    pub fn unknown_command(name: &str) -> Self {
        Self::failure(format!("Unknown command: {name}"), codes::UNKNOWN_COMMAND)
    }
}

impl From<MarshalError> for CommandResult {
    fn from(e: MarshalError) -> Self {
        Self::failure(e.to_string(), codes::INVALID_PARAMS)
    }
}

/// A result echoed back over the push channel, tagged with the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(rename = "commandId", default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(flatten)]
    pub result: CommandResult,
}
