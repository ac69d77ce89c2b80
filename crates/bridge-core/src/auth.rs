// SPDX-License-Identifier: Apache-2.0
//! The authenticator seam. `bridge-core` treats authentication
//! as an opaque accept/reject decision evaluated once per accepted
//! connection, before it enters `Connected`. Loading CIDR allowlists, TLS
//! client certs, or anything else that produces the decision is out of
//! scope here — this crate only consumes the verdict, never how it is
//! produced.

use std::net::IpAddr;

use async_trait::async_trait;

/// What a connecting peer presented, as far as `bridge-core` can observe
/// without terminating TLS or parsing credentials itself.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    pub client_ip: Option<IpAddr>,
    pub path: String,
}

/// The authenticator's verdict. On `Reject`, the core closes the connection
/// with WebSocket close code `4001` and `reason` as the close reason text.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    Accept {
        method: Option<String>,
        client_ip: Option<IpAddr>,
    },
    Reject {
        reason: String,
    },
}

impl AuthDecision {
    pub fn accept() -> Self {
        Self::Accept {
            method: None,
            client_ip: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthDecision::Accept { .. })
    }
}

/// Per-connection accept/reject hook, evaluated once per accepted socket.
///
/// Timing-safe credential comparison and the mitigation of any side
/// channels it implies are the implementor's concern — this trait only
/// carries the boolean decision.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, attempt: ConnectionAttempt) -> AuthDecision;
}

/// Accepts every connection. Default when no authenticator is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _attempt: ConnectionAttempt) -> AuthDecision {
        AuthDecision::accept()
    }
}

/// Rejects every connection with a fixed reason. Useful in tests that need
/// to exercise the `4001` close path.
#[derive(Debug, Clone)]
pub struct DenyAll {
    pub reason: String,
}

impl DenyAll {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Authenticator for DenyAll {
    async fn authenticate(&self, _attempt: ConnectionAttempt) -> AuthDecision {
        AuthDecision::Reject {
            reason: self.reason.clone(),
        }
    }
}
