// SPDX-License-Identifier: Apache-2.0
//! `ContextEngine` — the public entry point composing the directory walk,
//! ranking, token budgeting and snapshot/delta pieces of this crate into
//! five operations: build a filtered tree, rank files for a query,
//! assemble a budgeted set of file chunks, and take/diff snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bridge_protocol::{DirectoryTree, FileChunk};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ContextEngineConfig;
use crate::error::ContextError;
use crate::rank::rank_files;
use crate::snapshot::{self, Delta, Snapshot};
use crate::tokens::{estimate_tokens, truncate_to_budget};
use crate::walk::{walk, WalkResult};

const DEFAULT_CHUNK_BUDGET: usize = 4_000;

/// Owns a root path and its include/exclude rules; holds every snapshot
/// ever taken in memory, keyed by id, until the process exits — snapshots
/// are not garbage-collected.
pub struct ContextEngine {
    config: ContextEngineConfig,
    snapshots: RwLock<HashMap<Uuid, Arc<Snapshot>>>,
}

impl ContextEngine {
    pub fn new(config: ContextEngineConfig) -> Self {
        Self {
            config,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.config.root_path
    }

    /// Walks the root under the configured include/exclude rules and
    /// returns the filtered directory tree.
    pub fn build_tree(&self) -> Result<DirectoryTree, ContextError> {
        Ok(self.walk()?.tree)
    }

    fn walk(&self) -> Result<WalkResult, ContextError> {
        walk(&self.config)
    }

    /// Ranks every matched file against `query` by keyword overlap, most
    /// relevant first.
    pub fn rank(&self, query: &str) -> Result<Vec<String>, ContextError> {
        let result = self.walk()?;
        let rel: Vec<_> = result
            .files
            .iter()
            .map(|p| p.strip_prefix(&self.config.root_path).unwrap_or(p).to_path_buf())
            .collect();
        Ok(rank_files(&rel, query)
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect())
    }

    /// Assembles ranked `FileChunk`s for `query` whose aggregate estimated
    /// token count fits `budget` (default 4,000). Reads files in ranked
    /// order; the first file that doesn't fit whole is truncated line-wise
    /// to the remaining budget and assembly stops there.
    pub fn query(&self, query: &str, budget: Option<usize>) -> Result<Vec<FileChunk>, ContextError> {
        let budget = budget.unwrap_or(DEFAULT_CHUNK_BUDGET);
        let result = self.walk()?;
        let rel: Vec<_> = result
            .files
            .iter()
            .map(|p| p.strip_prefix(&self.config.root_path).unwrap_or(p).to_path_buf())
            .collect();
        let ranked = rank_files(&rel, query);

        let mut chunks = Vec::new();
        let mut spent = 0usize;
        for rel_path in ranked {
            let Ok(content) = std::fs::read_to_string(self.config.root_path.join(&rel_path)) else {
                continue; // not valid UTF-8 text; skip it
            };
            let cost = estimate_tokens(&content);
            let path_str = rel_path.to_string_lossy().into_owned();
            let language = language_for(&rel_path);

            if spent + cost <= budget {
                spent += cost;
                chunks.push(FileChunk {
                    path: path_str,
                    content,
                    start_line: None,
                    end_line: None,
                    language,
                });
                continue;
            }

            let remaining = budget.saturating_sub(spent);
            if remaining > 0 {
                let truncated = truncate_by_lines(&content, remaining);
                let end_line = truncated.lines().count() as u32;
                chunks.push(FileChunk {
                    path: path_str,
                    content: truncated,
                    start_line: Some(1),
                    end_line: Some(end_line),
                    language,
                });
            }
            break;
        }
        Ok(chunks)
    }

    /// Captures the current file set, tree and per-file `(mtime, size)`
    /// under a fresh id.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, ContextError> {
        let result = self.walk()?;
        let rel: Vec<_> = result
            .files
            .iter()
            .map(|p| p.strip_prefix(&self.config.root_path).unwrap_or(p).to_path_buf())
            .collect();
        let snap = Arc::new(Snapshot::new(result.tree, &rel, &self.config.root_path));
        self.snapshots.write().await.insert(snap.id, snap.clone());
        Ok(snap)
    }

    /// Diffs a fresh snapshot of the current filesystem state against the
    /// snapshot recorded under `from_id`. Fails with
    /// [`ContextError::SnapshotNotFound`] if `from_id` is unknown.
    pub async fn delta(&self, from_id: Uuid) -> Result<Delta, ContextError> {
        let from = self
            .snapshots
            .read()
            .await
            .get(&from_id)
            .cloned()
            .ok_or_else(|| snapshot::not_found(from_id))?;
        let to = self.snapshot().await?;
        Ok(snapshot::diff(&from, &to, &self.config.root_path))
    }

    pub async fn get_snapshot(&self, id: Uuid) -> Option<Arc<Snapshot>> {
        self.snapshots.read().await.get(&id).cloned()
    }
}

/// Truncates `text` to whole lines that fit `budget` estimated tokens,
/// keeping a truncated prefix line-wise up to the budget.
fn truncate_by_lines(text: &str, budget: usize) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let candidate = if out.is_empty() {
            line.to_string()
        } else {
            format!("{out}\n{line}")
        };
        if estimate_tokens(&candidate) > budget && !out.is_empty() {
            return out;
        }
        out = candidate;
    }
    if estimate_tokens(&out) > budget {
        truncate_to_budget(&out, budget)
    } else {
        out
    }
}

fn language_for(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let lang = match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" => "python",
        "go" => "go",
        "json" => "json",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        _ => return None,
    };
    Some(lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn rank_ranks_auth_first_for_auth_query() {
        let dir = tempdir().unwrap();
        write(dir.path(), "auth.ts", "export function login() {}");
        write(dir.path(), "utils.ts", "export function sum(a, b) { return a + b; }");
        write(dir.path(), "login.ts", "export function handleLogin() {}");

        let engine = ContextEngine::new(ContextEngineConfig::new(dir.path()));
        let ranked = engine.rank("fix authentication bug").unwrap();
        assert_eq!(ranked[0], "auth.ts");
    }

    #[test]
    fn query_stops_after_truncating_the_first_file_that_overflows_budget() {
        let dir = tempdir().unwrap();
        let long_content = "word ".repeat(10_000);
        write(dir.path(), "auth.ts", &long_content);
        write(dir.path(), "other.ts", "short file");

        let engine = ContextEngine::new(ContextEngineConfig::new(dir.path()));
        let chunks = engine.query("auth", Some(50)).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, "auth.ts");
        assert!(chunks[0].start_line.is_some());
        assert!(estimate_tokens(&chunks[0].content) <= 50);
    }

    #[tokio::test]
    async fn snapshot_then_delta_reports_added_and_modified() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.ts", "one");
        let engine = ContextEngine::new(ContextEngineConfig::new(dir.path()));
        let first = engine.snapshot().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        write(dir.path(), "b.ts", "two");
        write(dir.path(), "a.ts", "one but longer now");

        let delta = engine.delta(first.id).await.unwrap();
        assert_eq!(delta.changes.len(), 2);
        assert!(delta
            .changes
            .iter()
            .any(|c| c.path == "b.ts" && c.action == crate::snapshot::DeltaAction::Added));
        let modified = delta
            .changes
            .iter()
            .find(|c| c.path == "a.ts")
            .expect("a.ts should be modified");
        assert_eq!(modified.action, crate::snapshot::DeltaAction::Modified);
        assert!(modified.diff.as_deref().unwrap_or_default().len() > 0);
    }

    #[tokio::test]
    async fn delta_fails_for_unknown_snapshot_id() {
        let dir = tempdir().unwrap();
        let engine = ContextEngine::new(ContextEngineConfig::new(dir.path()));
        let err = engine.delta(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ContextError::SnapshotNotFound(_)));
    }
}
