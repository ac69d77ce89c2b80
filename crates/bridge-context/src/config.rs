// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::ContextError;

/// Options recognized by `ContextEngine`. `includePatterns`
/// empty means "include everything not excluded"; exclude is always
/// checked before include. Dot-file matching is enabled on both sets so a
/// pattern like `**/.env` actually matches.
#[derive(Debug, Clone)]
pub struct ContextEngineConfig {
    pub root_path: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: usize,
}

impl ContextEngineConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_depth: 10,
        }
    }

    pub(crate) fn build_globsets(&self) -> Result<(GlobSet, GlobSet), ContextError> {
        let include = build_globset(&self.include_patterns)?;
        let exclude = build_globset(&self.exclude_patterns)?;
        Ok((include, exclude))
    }
}

impl Default for ContextEngineConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ContextError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ContextError::InvalidConfiguration(format!("bad glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ContextError::InvalidConfiguration(e.to_string()))
}
