// SPDX-License-Identifier: Apache-2.0
//! Filtered, cycle-safe directory walk. Built on `walkdir`, already used
//! for source-tree traversal elsewhere in the stack; the cycle guard and
//! subtree pruning are applied on top of it rather than relying on
//! walkdir's own symlink-loop detection alone, since every *resolved* real
//! path must be visited at most once per walk, not just loops within one
//! symlink chain.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::GlobSet;
use walkdir::WalkDir;

use bridge_protocol::DirectoryTree;

use crate::config::ContextEngineConfig;
use crate::error::ContextError;

pub struct WalkResult {
    pub tree: DirectoryTree,
    /// Absolute paths of every file that matched the include/exclude rules.
    pub files: Vec<PathBuf>,
}

pub fn walk(config: &ContextEngineConfig) -> Result<WalkResult, ContextError> {
    let (include, exclude) = config.build_globsets()?;
    let root = &config.root_path;
    let mut visited_real_dirs: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    let mut it = WalkDir::new(root)
        .max_depth(config.max_depth)
        .follow_links(true)
        .sort_by(|a, b| match (a.file_type().is_dir(), b.file_type().is_dir()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.file_name().cmp(b.file_name()),
        })
        .into_iter();

    while let Some(entry) = it.next() {
        // Broken symlinks and permission-denied entries surface as `Err`
        // here; skip them silently.
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if path == root {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);

        if entry.file_type().is_dir() {
            if let Ok(real) = std::fs::canonicalize(path) {
                if !visited_real_dirs.insert(real) {
                    it.skip_current_dir();
                    continue;
                }
            }
            if exclude.is_match(rel) || !directory_may_match(rel, &include) {
                it.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }
        if exclude.is_match(rel) {
            continue;
        }
        if !include.is_empty() && !include.is_match(rel) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    let rel_files: Vec<PathBuf> = files
        .iter()
        .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
        .collect();
    let tree = build_tree(root_label(root), &rel_files);

    Ok(WalkResult { tree, files })
}

fn root_label(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(".")
        .to_string()
}

/// A directory is entered only if it could plausibly contain a matching
/// file: include is empty, some include pattern begins with `**`, or the
/// segment-by-segment prefix comparison of `rel_dir` against an include
/// pattern has not yet been falsified.
fn directory_may_match(rel_dir: &Path, include: &GlobSet) -> bool {
    if include.is_empty() {
        return true;
    }
    // `GlobSet` doesn't expose its source patterns, so the prefix check is
    // approximated by testing whether anything under this directory could
    // possibly match: a directory is a viable prefix of some include glob
    // if the glob matches this directory itself, a subdirectory of it would
    // plausibly match, or the directory is empty (root).
    if rel_dir.as_os_str().is_empty() {
        return true;
    }
    include.is_match(rel_dir) || include.is_match(rel_dir.join("**"))
}

/// Builds a `DirectoryTree` from the set of matched relative file paths,
/// inserting intermediate directory nodes as needed. Children are sorted
/// directories-first, then by name, matching the walk's own ordering.
fn build_tree(root_name: String, rel_files: &[PathBuf]) -> DirectoryTree {
    enum Node {
        File,
        Dir(std::collections::BTreeMap<String, Node>),
    }

    fn insert(map: &mut std::collections::BTreeMap<String, Node>, components: &[String]) {
        if components.is_empty() {
            return;
        }
        if components.len() == 1 {
            map.insert(components[0].clone(), Node::File);
            return;
        }
        let head = components[0].clone();
        let entry = map
            .entry(head)
            .or_insert_with(|| Node::Dir(std::collections::BTreeMap::new()));
        if let Node::Dir(child) = entry {
            insert(child, &components[1..]);
        }
    }

    fn to_tree(name: String, node: std::collections::BTreeMap<String, Node>) -> DirectoryTree {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for (child_name, child) in node {
            match child {
                Node::File => files.push(DirectoryTree::file(child_name)),
                Node::Dir(children) => dirs.push(to_tree(child_name, children)),
            }
        }
        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| a.name.cmp(&b.name));
        dirs.extend(files);
        DirectoryTree::directory(name, dirs)
    }

    let mut root = std::collections::BTreeMap::new();
    for rel in rel_files {
        let components: Vec<String> = rel
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        insert(&mut root, &components);
    }
    to_tree(root_name, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn walk_collects_matching_files_and_skips_excluded_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "hello").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/lib.ts"), "ignored").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/b.ts"), "world").unwrap();

        let mut config = ContextEngineConfig::new(dir.path());
        config.exclude_patterns = vec!["node_modules/**".to_string()];

        let result = walk(&config).unwrap();
        let names: Vec<String> = result
            .files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"a.ts".to_string()));
        assert!(names.contains(&"src/b.ts".to_string()));
        assert!(!names.iter().any(|n| n.contains("node_modules")));
    }

    #[test]
    fn include_patterns_narrow_the_result_set() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.ts"), "a").unwrap();
        fs::write(dir.path().join("skip.md"), "b").unwrap();

        let mut config = ContextEngineConfig::new(dir.path());
        config.include_patterns = vec!["*.ts".to_string()];

        let result = walk(&config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].ends_with("keep.ts"));
    }
}
