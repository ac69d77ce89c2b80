// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A slice of a file's content, optionally bounded to a line range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Whether a `DirectoryTree` node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNodeKind {
    File,
    Directory,
}

/// A recursive directory/file tree, filtered by `ContextEngine`'s include/exclude rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryTree {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TreeNodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DirectoryTree>>,
}

impl DirectoryTree {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TreeNodeKind::File,
            children: None,
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<DirectoryTree>) -> Self {
        Self {
            name: name.into(),
            kind: TreeNodeKind::Directory,
            children: Some(children),
        }
    }
}

/// A bundle of project context: ranked file excerpts, a directory tree, a
/// human summary, and free-form variables used to correlate responses
/// (`requestId`, `notificationType`, `error`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<DirectoryTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
}

impl Context {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Default::default()
        }
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_tree_round_trips_recursively() {
        let tree = DirectoryTree::directory(
            "src",
            vec![
                DirectoryTree::file("main.rs"),
                DirectoryTree::directory("util", vec![DirectoryTree::file("mod.rs")]),
            ],
        );
        let json = serde_json::to_string(&tree).unwrap();
        let back: DirectoryTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn context_variables_round_trip() {
        let mut ctx = Context::with_summary("fix auth bug");
        ctx.set_variable("requestId", Value::String("abc".into()));
        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back.variable("requestId").unwrap(), "abc");
    }

    #[test]
    fn empty_context_omits_optional_fields() {
        let ctx = Context::default();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
