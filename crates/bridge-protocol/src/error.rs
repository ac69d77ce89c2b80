// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failure kinds the wire codec can produce.
///
/// Mirrors the `Protocol` kind from the bridge's error taxonomy: decode
/// failures are isolated to the offending frame and never propagate as a
/// connection-level error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Parse(String),

    #[error("envelope schema violation at {path}: {message}")]
    Schema { path: String, message: String },

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl ProtocolError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }
}
