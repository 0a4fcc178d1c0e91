//! Wire protocol between driver and target.
//!
//! Every message is one JSON object behind a 4-byte big-endian length
//! prefix. Requests carry a `type` tag, a `data` payload and a send
//! `timestamp`; responses carry a `success` flag plus either `data` or an
//! error with a code and suggestion.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::command::{now_timestamp, CommandResult, PrimitiveCommand};
use crate::error::{ApiError, ErrorCode};
use crate::geometry::{Point, Size};

/// Largest accepted frame payload, in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Request type tags in wire form.
pub const REQUEST_TYPES: [&str; 5] = [
    "resolve_element",
    "get_app_region",
    "get_screenshot",
    "execute_batch",
    "disconnect",
];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown request type: {0}")]
    UnknownType(String),

    #[error("invalid data for {kind}: {reason}")]
    InvalidData { kind: String, reason: String },
}

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { size, max } => ApiError::frame_too_large(size, max),
            other => ApiError::protocol(other.to_string()),
        }
    }
}

/// Request payloads, tagged by `type` with the payload under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// Resolve an element path to its rectangle.
    ResolveElement {
        path: String,
        #[serde(default)]
        role_constraints: Vec<Option<String>>,
    },
    /// Rectangle of the bound application.
    GetAppRegion {},
    /// PNG screenshot of a region, or the whole screen.
    GetScreenshot {
        #[serde(default)]
        region: Option<[u32; 4]>,
    },
    /// Run primitives in order.
    ExecuteBatch { commands: Vec<PrimitiveCommand> },
    /// Clear the target's cache and close the connection.
    Disconnect {},
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ResolveElement { .. } => "resolve_element",
            Command::GetAppRegion {} => "get_app_region",
            Command::GetScreenshot { .. } => "get_screenshot",
            Command::ExecuteBatch { .. } => "execute_batch",
            Command::Disconnect {} => "disconnect",
        }
    }
}

/// Request envelope as it appears on the wire, before the payload is typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: f64,
}

/// A request from driver to target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub struct Request {
    pub command: Command,
    /// Send time, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            timestamp: now_timestamp(),
        }
    }
}

impl TryFrom<Envelope> for Request {
    type Error = FrameError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        if !REQUEST_TYPES.contains(&envelope.kind.as_str()) {
            return Err(FrameError::UnknownType(envelope.kind));
        }
        let data = match envelope.data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let tagged = serde_json::json!({ "type": envelope.kind, "data": data });
        let command = serde_json::from_value(tagged).map_err(|e| FrameError::InvalidData {
            kind: envelope.kind.clone(),
            reason: e.to_string(),
        })?;
        Ok(Request {
            command,
            timestamp: envelope.timestamp,
        })
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        let kind = request.command.kind().to_string();
        let data = match serde_json::to_value(&request.command) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Envelope {
            kind,
            data,
            timestamp: request.timestamp,
        }
    }
}

/// A response from target to driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Response {
    pub fn success(data: ResponseData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            suggestion: None,
        }
    }

    pub fn error(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.message),
            code: Some(error.code),
            suggestion: error.suggestion,
        }
    }

    /// Batch response: results are always included, and a failure summary
    /// accompanies any failed primitive.
    pub fn batch(results: Vec<CommandResult>) -> Self {
        let total = results.len();
        let failed = results.iter().filter(|r| !r.success).count();
        let mut response = Self::success(ResponseData::Batch { results });
        if failed > 0 {
            let err = ApiError::batch_failed(failed, total);
            response.success = false;
            response.error = Some(err.message);
            response.code = Some(err.code);
            response.suggestion = err.suggestion;
        }
        response
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::success(ResponseData::Ok {
            message: message.into(),
        })
    }

    /// The error carried by a failed response.
    pub fn api_error(&self) -> Option<ApiError> {
        if self.success {
            return None;
        }
        Some(ApiError {
            code: self.code.unwrap_or(ErrorCode::InternalError),
            message: self
                .error
                .clone()
                .unwrap_or_else(|| "request failed without an error message".to_string()),
            suggestion: self.suggestion.clone(),
        })
    }
}

/// Response payloads, distinguished by their field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Element {
        position: Point,
        size: Size,
        name: String,
        role: String,
    },
    Region {
        region: [u32; 4],
    },
    /// PNG bytes as lowercase hex; `size` is the byte count before encoding.
    Screenshot {
        image_bytes_hex: String,
        size: usize,
    },
    Batch {
        results: Vec<CommandResult>,
    },
    Ok {
        message: String,
    },
}

/// Serialize a message into a length-prefixed frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message)?;
    let header = frame_header(payload.len())?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Length prefix for a payload of `len` bytes.
pub fn frame_header(len: usize) -> Result<[u8; FRAME_HEADER_LEN], FrameError> {
    check_frame_len(len)?;
    // MAX_FRAME_SIZE fits in u32.
    Ok((len as u32).to_be_bytes())
}

/// Declared payload length of a frame header.
pub fn parse_header(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_be_bytes(header) as usize
}

pub fn check_frame_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// Decode one frame payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice::<T>(payload).map_err(unwrap_envelope_error)
}

/// `try_from` failures surface as custom serde errors; recover the
/// message so callers see the specific problem.
fn unwrap_envelope_error(err: serde_json::Error) -> FrameError {
    let message = err.to_string();
    if let Some(kind) = message.strip_prefix("unknown request type: ") {
        let kind = kind.split(" at line").next().unwrap_or(kind);
        return FrameError::UnknownType(kind.to_string());
    }
    FrameError::Malformed(err)
}
