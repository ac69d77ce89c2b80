// SPDX-License-Identifier: Apache-2.0
//! Free-text ranking over a file set: keyword substring matching against
//! each file's relative path, done in-process against an already-walked
//! file list.

use std::path::{Path, PathBuf};

const INDEX_OR_MAIN_BASENAMES: [&str; 4] = ["index.ts", "index.js", "main.ts", "main.js"];

/// Lowercases and splits `query` on whitespace, keeping tokens longer than
/// two characters as keywords.
fn keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|tok| tok.len() > 2)
        .map(str::to_string)
        .collect()
}

fn score(rel_path: &Path, keywords: &[String]) -> i64 {
    let rel_lower = rel_path.to_string_lossy().to_lowercase();
    let basename = rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let mut score = 0i64;
    for kw in keywords {
        if rel_lower.contains(kw.as_str()) {
            score += 10;
        }
    }
    if INDEX_OR_MAIN_BASENAMES.contains(&basename) {
        score += 5;
    }
    if basename == "package.json" {
        score += 3;
    }
    score
}

/// Ranks `rel_paths` (relative to the context root) for `query`: descending
/// score, ties broken by ascending relative path.
pub fn rank_files(rel_paths: &[PathBuf], query: &str) -> Vec<PathBuf> {
    let kws = keywords(query);
    let mut scored: Vec<(i64, &PathBuf)> = rel_paths.iter().map(|p| (score(p, &kws), p)).collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().map(|(_, p)| p.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_file_outranks_unrelated_files_for_an_auth_query() {
        let files = vec![
            PathBuf::from("auth.ts"),
            PathBuf::from("utils.ts"),
            PathBuf::from("login.ts"),
        ];
        let ranked = rank_files(&files, "fix authentication bug");
        assert_eq!(ranked[0], PathBuf::from("auth.ts"));
    }

    #[test]
    fn ties_break_by_ascending_relative_path() {
        let files = vec![PathBuf::from("zeta.ts"), PathBuf::from("alpha.ts")];
        let ranked = rank_files(&files, "no matching keywords here");
        assert_eq!(ranked, vec![PathBuf::from("alpha.ts"), PathBuf::from("zeta.ts")]);
    }

    #[test]
    fn index_and_main_get_a_bonus() {
        let files = vec![PathBuf::from("src/index.ts"), PathBuf::from("src/other.ts")];
        let ranked = rank_files(&files, "");
        assert_eq!(ranked[0], PathBuf::from("src/index.ts"));
    }
}
