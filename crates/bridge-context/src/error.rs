// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;
use uuid::Uuid;

/// Failure kinds the context engine can surface. Mirrors the `Context`
/// kind from the bridge's error taxonomy (`SnapshotNotFound`); `Io` covers
/// everything a directory walk or file read can fail with, folded into one
/// variant since the engine never needs to distinguish "permission denied"
/// from "not a file" — both are skipped or reported the same way.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
