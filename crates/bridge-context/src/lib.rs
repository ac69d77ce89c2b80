// SPDX-License-Identifier: Apache-2.0
//! Directory walk, filtering, ranking, budgeted chunk assembly and
//! snapshot/delta computation for shared project context.
//!
//! Has no knowledge of peers or the wire protocol — `bridge-core` calls
//! [`ContextEngine::query`] from a registered context handler and hands the
//! resulting `Vec<FileChunk>` to the router.

mod config;
mod engine;
mod error;
mod rank;
mod snapshot;
mod tokens;
mod walk;

pub use config::ContextEngineConfig;
pub use engine::ContextEngine;
pub use error::ContextError;
pub use snapshot::{Delta, DeltaAction, DeltaChange, Snapshot};
pub use tokens::{estimate_tokens, truncate_to_budget};
