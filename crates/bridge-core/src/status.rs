// SPDX-License-Identifier: Apache-2.0
//! The status document shape exposed to a daemon wrapper. Writing it to a
//! file is an external side-channel — this crate only defines the data.

use serde::Serialize;

use crate::config::Mode;
use crate::registry::PeerInfo;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub port: Option<u16>,
    pub instance_name: String,
    pub mode: Mode,
    pub peers: Vec<PeerInfo>,
}
