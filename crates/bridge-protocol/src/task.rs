// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of work the remote side is being asked to do.
///
/// The bridge never interprets this — it is forwarded verbatim to whatever
/// handler the receiving side has registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScope {
    Execute,
    Analyze,
    Suggest,
}

/// How the receiver should shape `TaskResult::data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFormat {
    Full,
    Summary,
    Diff,
}

/// A request to run an ad-hoc task on the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub id: String,
    pub description: String,
    pub scope: TaskScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_format: Option<ReturnFormat>,
    /// Per-request timeout in milliseconds; falls back to `BridgeConfig::task_timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
}

impl TaskRequest {
    pub fn new(id: impl Into<String>, description: impl Into<String>, scope: TaskScope) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            scope,
            constraints: Vec::new(),
            return_format: None,
            timeout: None,
            data: None,
        }
    }
}

/// What happened to a file as a side effect of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAction {
    Created,
    Modified,
    Deleted,
}

/// A single file-level side effect reported alongside a `TaskResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub action: ArtifactAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Outcome of running a `TaskRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub success: bool,
    #[serde(default = "default_data")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_data() -> Value {
    Value::Null
}

impl TaskResult {
    pub fn ok(task_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: Some(task_id.into()),
            success: true,
            data,
            artifacts: Vec::new(),
            follow_up: None,
            error: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            success: false,
            data: Value::Null,
            artifacts: Vec::new(),
            follow_up: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_scope_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskScope::Execute).unwrap(),
            "\"execute\""
        );
    }

    #[test]
    fn task_result_round_trip_with_artifacts() {
        let mut r = TaskResult::ok("t-1", serde_json::json!({"echoId": "t-1"}));
        r.artifacts.push(Artifact {
            path: "src/lib.rs".into(),
            action: ArtifactAction::Modified,
            diff: Some("...".into()),
        });
        let json = serde_json::to_string(&r).unwrap();
        let back: TaskResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn task_request_defaults_are_omitted() {
        let req = TaskRequest::new("t-1", "do a thing", TaskScope::Execute);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("constraints").is_none());
        assert!(json.get("timeout").is_none());
    }
}
