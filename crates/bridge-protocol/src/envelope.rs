// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::error::ProtocolError;
use crate::task::{TaskRequest, TaskResult};

/// The closed set of envelope kinds. Unknown `type` values fail to
/// deserialize with [`ProtocolError::Schema`] rather than being ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    ContextSync,
    TaskDelegate,
    Notification,
}

/// The single frame that crosses the wire. Exactly one of `context`, `task`,
/// `result` is populated, and which one is determined by `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Envelope {
    /// Assigns a fresh id and the current wall clock time, the way
    /// `createEnvelope` does.
    pub fn create(message_type: MessageType, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            source: source.into(),
            timestamp: Utc::now().timestamp_millis(),
            context: None,
            task: None,
            result: None,
        }
    }

    pub fn task_delegate(source: impl Into<String>, task: TaskRequest) -> Self {
        let mut env = Self::create(MessageType::TaskDelegate, source);
        env.task = Some(task);
        env
    }

    pub fn response_result(source: impl Into<String>, result: TaskResult) -> Self {
        let mut env = Self::create(MessageType::Response, source);
        env.result = Some(result);
        env
    }

    pub fn response_context(source: impl Into<String>, context: Context) -> Self {
        let mut env = Self::create(MessageType::Response, source);
        env.context = Some(context);
        env
    }

    pub fn context_sync(source: impl Into<String>, context: Context) -> Self {
        let mut env = Self::create(MessageType::ContextSync, source);
        env.context = Some(context);
        env
    }

    pub fn request_context(source: impl Into<String>, context: Context) -> Self {
        let mut env = Self::create(MessageType::Request, source);
        env.context = Some(context);
        env
    }

    /// Serializes this envelope to a single JSON text frame. Fails only if
    /// the payload contains un-encodable values.
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Parses a JSON text frame into an envelope. Distinguishes malformed
    /// JSON (`Parse`) from a well-formed document that fails the envelope
    /// schema, e.g. an unrecognized `type` (`Schema`).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Parse(e.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| ProtocolError::schema("type", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskScope;

    #[test]
    fn task_delegate_round_trips() {
        let env = Envelope::task_delegate(
            "agent-a",
            TaskRequest::new("t-1", "summarize diff", TaskScope::Analyze),
        );
        let bytes = env.serialize().unwrap();
        let back = Envelope::deserialize(&bytes).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.message_type, MessageType::TaskDelegate);
    }

    #[test]
    fn unknown_type_is_schema_error() {
        let bytes = br#"{"id":"00000000-0000-0000-0000-000000000000","type":"bogus","source":"a","timestamp":0}"#;
        let err = Envelope::deserialize(bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::Schema { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Envelope::deserialize(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let bytes = br#"{"id":"00000000-0000-0000-0000-000000000000","type":"notification","source":"a","timestamp":0,"extra":"ignored"}"#;
        let env = Envelope::deserialize(bytes).unwrap();
        assert_eq!(env.message_type, MessageType::Notification);
    }

    #[test]
    fn exactly_one_payload_field_serialized_for_response() {
        let env = Envelope::response_result("agent-b", TaskResult::ok("t-1", serde_json::json!(null)));
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("result").is_some());
        assert!(json.get("task").is_none());
        assert!(json.get("context").is_none());
    }
}
