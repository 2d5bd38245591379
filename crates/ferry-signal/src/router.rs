//! Point-to-point signal relay
//!
//! Forwards negotiation payloads between the two endpoints of a share.
//! Authorization is room membership on both ends, nothing else. Routing
//! failures are silent by design: answering a probe with `not-found`
//! would tell a scanner which shares and endpoints exist. The only trace
//! a bad relay attempt leaves is an audit entry and a suspicion mark.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::audit::{AuditEntry, AuditLevel, AuditLog};
use crate::guard::AbuseGuard;
use crate::messages::ServerEvent;
use crate::rooms::PeerMap;

/// Why a relay attempt went nowhere
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    SenderNotInRoom,
    TargetNotConnected,
    TargetNotInRoom,
}

impl DropReason {
    fn as_str(&self) -> &'static str {
        match self {
            DropReason::SenderNotInRoom => "sender-not-in-room",
            DropReason::TargetNotConnected => "target-not-connected",
            DropReason::TargetNotInRoom => "target-not-in-room",
        }
    }
}

/// The relay itself
pub struct SignalRouter {
    peers: Arc<PeerMap>,
    audit: Arc<AuditLog>,
    guard: Arc<AbuseGuard>,
}

impl SignalRouter {
    pub fn new(peers: Arc<PeerMap>, audit: Arc<AuditLog>, guard: Arc<AbuseGuard>) -> Self {
        Self {
            peers,
            audit,
            guard,
        }
    }

    /// Relay `data` from `from` to `to` within `share`.
    ///
    /// The payload is forwarded verbatim and never inspected. Any check
    /// failure drops the message without a reply to the sender; the
    /// outcome is returned for tests and internal accounting only.
    pub fn relay(
        &self,
        from: &str,
        to: &str,
        share: &str,
        data: serde_json::Value,
    ) -> Result<(), DropReason> {
        if !self.peers.is_member(share, from) {
            self.drop_signal(from, share, DropReason::SenderNotInRoom);
            return Err(DropReason::SenderNotInRoom);
        }
        if !self.peers.is_connected(to) {
            self.drop_signal(from, share, DropReason::TargetNotConnected);
            return Err(DropReason::TargetNotConnected);
        }
        if !self.peers.is_member(share, to) {
            self.drop_signal(from, share, DropReason::TargetNotInRoom);
            return Err(DropReason::TargetNotInRoom);
        }

        self.peers.send(
            to,
            ServerEvent::Signal {
                from: from.to_string(),
                data,
            },
        );
        Ok(())
    }

    fn drop_signal(&self, from: &str, share: &str, reason: DropReason) {
        debug!("Dropped signal from {} for {}: {}", from, share, reason.as_str());

        let mut entry = AuditEntry::new(AuditLevel::Security, "signal-drop")
            .peer(from)
            .share(share)
            .details(json!({ "reason": reason.as_str() }));

        if let Some(ip) = self.peers.ip_of(from) {
            entry = entry.ip(ip);
            self.guard.mark_suspicious(ip, reason.as_str());
        }
        self.audit.record(entry);
    }
}
