//! Event payloads and their flattening into storage rows.
//!
//! Payloads arrive in the insert format (top-level metadata plus a free-form
//! `data` object carrying the exception interface). Before storage each
//! payload is flattened into an [`EventRow`] with one cell per catalog
//! column; nested interfaces become parallel arrays.

use crate::columns::ColumnCatalog;
use crate::value::Value;
use crate::{EventId, ProjectId, Timestamp};
use serde::{Deserialize, Serialize};

/// Errors raised while flattening a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Event {event_id} has an invalid datetime '{value}'")]
    InvalidDatetime { event_id: String, value: String },

    #[error("Event {event_id} has an invalid received time")]
    InvalidReceived { event_id: String },
}

/// Event in insert format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_id: EventId,

    #[serde(default)]
    pub primary_hash: String,

    pub project_id: ProjectId,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub platform: String,

    /// Occurrence time, RFC3339 or naive UTC
    pub datetime: String,

    #[serde(default)]
    pub data: EventData,
}

/// Free-form event body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Unix seconds at which the event was received
    #[serde(default)]
    pub received: Option<f64>,

    #[serde(default)]
    pub culprit: Option<String>,

    #[serde(default)]
    pub tags: Vec<(String, String)>,

    #[serde(default)]
    pub user: Option<UserData>,

    #[serde(default)]
    pub exception: Option<ExceptionData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    #[serde(default)]
    pub values: Vec<ExceptionValue>,
}

/// One exception in a (possibly chained) exception interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionValue {
    #[serde(rename = "type", default)]
    pub exception_type: Option<String>,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub mechanism: Option<Mechanism>,

    #[serde(default)]
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mechanism {
    #[serde(rename = "type", default)]
    pub mechanism_type: Option<String>,

    #[serde(default)]
    pub handled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub lineno: Option<u64>,
    #[serde(default)]
    pub colno: Option<u64>,
    #[serde(default)]
    pub in_app: Option<bool>,
}

/// A flattened event: one cell per catalog column, in catalog order
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    cells: Vec<Value>,
}

impl EventRow {
    /// Flatten a payload into catalog order
    pub fn from_payload(payload: &EventPayload) -> Result<Self, EventError> {
        let timestamp = Timestamp::parse_lenient(&payload.datetime).map_err(|_| {
            EventError::InvalidDatetime {
                event_id: payload.event_id.to_string(),
                value: payload.datetime.clone(),
            }
        })?;

        let received = match payload.data.received {
            Some(seconds) => Timestamp::from_unix_seconds(seconds).ok_or_else(|| {
                EventError::InvalidReceived {
                    event_id: payload.event_id.to_string(),
                }
            })?,
            None => timestamp,
        };

        let user = payload.data.user.clone().unwrap_or_default();
        let exceptions: &[ExceptionValue] = payload
            .data
            .exception
            .as_ref()
            .map(|e| e.values.as_slice())
            .unwrap_or_default();

        let frames: Vec<(u64, &Frame)> = exceptions
            .iter()
            .enumerate()
            .flat_map(|(level, exception)| {
                exception
                    .stacktrace
                    .iter()
                    .flat_map(|st| st.frames.iter())
                    .map(move |frame| (level as u64, frame))
            })
            .collect();

        let stacks = |f: fn(&ExceptionValue) -> Value| -> Value {
            Value::Array(exceptions.iter().map(f).collect())
        };
        let frame_column = |f: fn(&Frame) -> Value| -> Value {
            Value::Array(frames.iter().map(|(_, frame)| f(frame)).collect())
        };
        let optional_bool = |b: Option<bool>| b.map(Value::Bool).unwrap_or(Value::Null);
        let optional_uint = |n: Option<u64>| n.map(Value::UInt).unwrap_or(Value::Null);

        let cells = ColumnCatalog
            .columns()
            .iter()
            .map(|column| match column.name {
                "event_id" => Value::from(payload.event_id.as_str()),
                "project_id" => Value::UInt(payload.project_id.as_u64()),
                "timestamp" => Value::DateTime(timestamp),
                "received" => Value::DateTime(received),
                "message" => Value::from(payload.message.as_str()),
                "platform" => Value::from(payload.platform.as_str()),
                "primary_hash" => Value::from(payload.primary_hash.as_str()),
                "culprit" => Value::from(payload.data.culprit.clone()),
                "user_id" => Value::from(user.id.clone()),
                "username" => Value::from(user.username.clone()),
                "email" => Value::from(user.email.clone()),
                "ip_address" => Value::from(user.ip_address.clone()),
                "tags.key" => Value::Array(
                    payload
                        .data
                        .tags
                        .iter()
                        .map(|(k, _)| Value::from(k.as_str()))
                        .collect(),
                ),
                "tags.value" => Value::Array(
                    payload
                        .data
                        .tags
                        .iter()
                        .map(|(_, v)| Value::from(v.as_str()))
                        .collect(),
                ),
                "exception_stacks.type" => stacks(|e| Value::from(e.exception_type.clone())),
                "exception_stacks.value" => stacks(|e| Value::from(e.value.clone())),
                "exception_stacks.mechanism_type" => stacks(|e| {
                    Value::from(e.mechanism.as_ref().and_then(|m| m.mechanism_type.clone()))
                }),
                "exception_stacks.mechanism_handled" => stacks(|e| {
                    e.mechanism
                        .as_ref()
                        .and_then(|m| m.handled)
                        .map(Value::Bool)
                        .unwrap_or(Value::Null)
                }),
                "exception_frames.abs_path" => frame_column(|f| Value::from(f.abs_path.clone())),
                "exception_frames.filename" => frame_column(|f| Value::from(f.filename.clone())),
                "exception_frames.function" => frame_column(|f| Value::from(f.function.clone())),
                "exception_frames.module" => frame_column(|f| Value::from(f.module.clone())),
                "exception_frames.lineno" => {
                    Value::Array(frames.iter().map(|(_, f)| optional_uint(f.lineno)).collect())
                }
                "exception_frames.colno" => {
                    Value::Array(frames.iter().map(|(_, f)| optional_uint(f.colno)).collect())
                }
                "exception_frames.in_app" => {
                    Value::Array(frames.iter().map(|(_, f)| optional_bool(f.in_app)).collect())
                }
                "exception_frames.stack_level" => {
                    Value::Array(frames.iter().map(|(level, _)| Value::UInt(*level)).collect())
                }
                _ => Value::Null,
            })
            .collect();

        Ok(Self { cells })
    }

    /// Cells in catalog order
    pub fn into_cells(self) -> Vec<Value> {
        self.cells
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
