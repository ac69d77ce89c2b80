// SPDX-License-Identifier: Apache-2.0
//! Snapshots and deltas. A snapshot is an immutable record of the matched
//! file set, the directory tree, and per-file `(mtime, size)`, captured
//! under a fresh id. `get_delta` diffs two snapshots taken at different
//! times against the live filesystem state recorded at each.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bridge_protocol::DirectoryTree;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ContextError;

const KEY_FILE_BASENAMES: [&str; 10] = [
    "package.json",
    "tsconfig.json",
    "index.ts",
    "index.js",
    "main.ts",
    "main.js",
    "app.ts",
    "app.js",
    "README.md",
    "CLAUDE.md",
];

const DIFF_PREVIEW_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FileStat {
    pub mtime_ms: i64,
    pub size: u64,
}

/// An immutable point-in-time record of one context root.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub timestamp: i64,
    pub tree: DirectoryTree,
    pub summary: String,
    pub key_files: Vec<String>,
    #[serde(skip)]
    pub(crate) files: HashMap<PathBuf, FileStat>,
}

impl Snapshot {
    pub(crate) fn new(tree: DirectoryTree, rel_files: &[PathBuf], root: &Path) -> Self {
        let mut files = HashMap::with_capacity(rel_files.len());
        for rel in rel_files {
            if let Ok(meta) = std::fs::metadata(root.join(rel)) {
                files.insert(
                    rel.clone(),
                    FileStat {
                        mtime_ms: mtime_millis(&meta),
                        size: meta.len(),
                    },
                );
            }
        }
        let key_files = rel_files
            .iter()
            .filter(|p| is_key_file(p))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_millis(),
            summary: summarize(rel_files),
            tree,
            key_files,
            files,
        }
    }
}

fn is_key_file(rel: &Path) -> bool {
    rel.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| KEY_FILE_BASENAMES.contains(&name))
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One-line count of files and top-5 extensions by count, e.g.
/// `"12 files (.ts: 7, .json: 2, .md: 2, .js: 1)"`.
fn summarize(rel_files: &[PathBuf]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for path in rel_files {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| "(none)".to_string());
        *counts.entry(ext).or_insert(0) += 1;
    }
    let mut by_count: Vec<(String, usize)> = counts.into_iter().collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    by_count.truncate(5);

    let breakdown = by_count
        .iter()
        .map(|(ext, n)| format!("{ext}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");

    if breakdown.is_empty() {
        format!("{} files", rel_files.len())
    } else {
        format!("{} files ({breakdown})", rel_files.len())
    }
}

/// What happened to a single path between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaChange {
    pub path: String,
    pub action: DeltaAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delta {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub changes: Vec<DeltaChange>,
}

/// Diffs `from` against `to`, reading current content under `root` for
/// modified files' diff preview (first 1000 bytes, `"..."`-suffixed if
/// truncated).
pub(crate) fn diff(from: &Snapshot, to: &Snapshot, root: &Path) -> Delta {
    let mut changes = Vec::new();

    for (path, to_stat) in &to.files {
        match from.files.get(path) {
            None => changes.push(DeltaChange {
                path: path.to_string_lossy().into_owned(),
                action: DeltaAction::Added,
                diff: None,
            }),
            Some(from_stat) => {
                if from_stat.mtime_ms != to_stat.mtime_ms || from_stat.size != to_stat.size {
                    changes.push(DeltaChange {
                        path: path.to_string_lossy().into_owned(),
                        action: DeltaAction::Modified,
                        diff: Some(diff_preview(root, path)),
                    });
                }
            }
        }
    }
    for path in from.files.keys() {
        if !to.files.contains_key(path) {
            changes.push(DeltaChange {
                path: path.to_string_lossy().into_owned(),
                action: DeltaAction::Deleted,
                diff: None,
            });
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    Delta {
        from_id: from.id,
        to_id: to.id,
        changes,
    }
}

fn diff_preview(root: &Path, rel: &Path) -> String {
    match std::fs::read_to_string(root.join(rel)) {
        Ok(content) => {
            if content.len() <= DIFF_PREVIEW_BYTES {
                content
            } else {
                let mut end = DIFF_PREVIEW_BYTES;
                while !content.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &content[..end])
            }
        }
        Err(_) => String::new(),
    }
}

pub fn not_found(id: Uuid) -> ContextError {
    ContextError::SnapshotNotFound(id)
}
