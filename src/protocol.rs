//! Commands accepted by the worker and the responses it produces.
//!
//! On the wire every message is adjacently tagged:
//! `{"type": "UPDATE_SCENE", "payload": {...}}`. `TICK` is written with an
//! empty object as payload and read with or without one.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::scene::SerializedSceneGraph;
use crate::world::{DiagnosticInfo, WorldState};


/// Stable machine-readable error identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MalformedMessage,
    UnknownDeviceType,
    UnknownSplitType,
    DuplicateDeviceId,
    InvalidGeometry,
    InvalidParameter,
    StaleSceneVersion,
    NoScene,
    SurrogateLoadFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorCode::UnknownDeviceType => "UNKNOWN_DEVICE_TYPE",
            ErrorCode::UnknownSplitType => "UNKNOWN_SPLIT_TYPE",
            ErrorCode::DuplicateDeviceId => "DUPLICATE_DEVICE_ID",
            ErrorCode::InvalidGeometry => "INVALID_GEOMETRY",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::StaleSceneVersion => "STALE_SCENE_VERSION",
            ErrorCode::NoScene => "NO_SCENE",
            ErrorCode::SurrogateLoadFailed => "SURROGATE_LOAD_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages from the host to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Replaces the scene. Versions must strictly increase.
    UpdateScene(SerializedSceneGraph),
    /// Raw surrogate table bytes.
    SetSurrogateModel(Vec<u8>),
    Tick(TickPayload),
}

impl Command {
    pub fn tick() -> Self {
        Command::Tick(TickPayload {})
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::UpdateScene(_) => "UPDATE_SCENE",
            Command::SetSurrogateModel(_) => "SET_SURROGATE_MODEL",
            Command::Tick(_) => "TICK",
        }
    }
}

/// Body of a `TICK`. Serializes as `{}`; a missing or `null` payload reads
/// the same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickPayload {}

impl<'de> Deserialize<'de> for TickPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Body {}

        Option::<Body>::deserialize(deserializer).map(|_| TickPayload {})
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Messages from the worker to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    WorldState(WorldState),
    /// Standalone telemetry for a tick that did not finish cleanly.
    Diagnostic(DiagnosticInfo),
    Error(ErrorPayload),
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Response::Error(payload) => Some(payload.code),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Malformed(_) => ErrorCode::MalformedMessage,
        }
    }
}

pub fn decode_command(text: &str) -> Result<Command, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_command(command: &Command) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(command)?)
}

pub fn decode_response(text: &str) -> Result<Response, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(response)?)
}
