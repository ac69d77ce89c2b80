// SPDX-License-Identifier: Apache-2.0
//! Wire-protocol types shared by both sides of an agent bridge connection:
//! the message envelope, task delegation payloads, and context payloads.
//!
//! This crate has no knowledge of sockets, peers, or scheduling — just the
//! schema and its JSON text-frame encoding.

mod context;
mod envelope;
mod error;
mod task;

pub use context::{Context, DirectoryTree, FileChunk, TreeNodeKind};
pub use envelope::{Envelope, MessageType};
pub use error::ProtocolError;
pub use task::{Artifact, ArtifactAction, ReturnFormat, TaskRequest, TaskResult, TaskScope};
