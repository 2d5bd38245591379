//! Abuse guard
//!
//! Per-IP connection tracking with an escalating response: individual
//! rejections past a soft ceiling, a 15-minute automatic block past the
//! hard one. Rule violations anywhere in the server (bad ids, bad codes,
//! off-room signaling, limiter breaches) feed a suspicion counter that
//! raises an elevated alert when an IP keeps misbehaving.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditLevel, AuditLog};

/// Rolling window for connection counting
const WINDOW: Duration = Duration::from_secs(60);

/// Connections per window before individual rejections start
const SOFT_LIMIT: u32 = 10;

/// Connections per window before the IP is blocked outright
const HARD_LIMIT: u32 = 50;

/// How long a hard block lasts
const BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);

/// Suspicious events before the elevated alert fires
const SUSPICION_ALERT_THRESHOLD: u32 = 5;

/// Verdict for one connection attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectVerdict {
    Allowed,
    /// Over the soft ceiling; this attempt is refused
    Rejected { retry_in: Duration },
    /// IP is in a block
    Blocked { remaining: Duration },
}

#[derive(Debug)]
struct IpTracker {
    connections: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
    suspicious: u32,
    /// Elevated alert already emitted for this entry
    alerted: bool,
}

impl IpTracker {
    fn fresh(now: Instant) -> Self {
        Self {
            connections: 0,
            window_start: now,
            blocked_until: None,
            suspicious: 0,
            alerted: false,
        }
    }
}

/// Escalating per-IP abuse protection
pub struct AbuseGuard {
    entries: RwLock<HashMap<IpAddr, IpTracker>>,
    audit: Arc<AuditLog>,
}

impl AbuseGuard {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Account for a new connection attempt from `ip`
    pub fn track_connect(&self, ip: IpAddr) -> ConnectVerdict {
        self.track_connect_at(ip, Instant::now())
    }

    fn track_connect_at(&self, ip: IpAddr, now: Instant) -> ConnectVerdict {
        let mut entries = self.entries.write();
        let entry = entries.entry(ip).or_insert_with(|| IpTracker::fresh(now));

        if let Some(until) = entry.blocked_until {
            if now < until {
                return ConnectVerdict::Blocked {
                    remaining: until - now,
                };
            }
            // Block served, start over
            *entry = IpTracker::fresh(now);
        }

        if now.duration_since(entry.window_start) > WINDOW {
            entry.connections = 1;
            entry.window_start = now;
        } else {
            entry.connections += 1;
        }

        if entry.connections > HARD_LIMIT {
            entry.blocked_until = Some(now + BLOCK_DURATION);
            warn!("Blocking {} for {:?}: {} connections in window", ip, BLOCK_DURATION, entry.connections);
            self.audit.record(
                AuditEntry::new(AuditLevel::Security, "ip-blocked")
                    .ip(ip)
                    .details(json!({
                        "connections": entry.connections,
                        "blockMinutes": BLOCK_DURATION.as_secs() / 60,
                    })),
            );
            return ConnectVerdict::Blocked {
                remaining: BLOCK_DURATION,
            };
        }

        if entry.connections > SOFT_LIMIT {
            note_suspicion(&self.audit, entry, ip, "connection-flood");
            let elapsed = now.duration_since(entry.window_start);
            let retry_in = WINDOW.saturating_sub(elapsed);
            debug!("Rejecting connection from {}: {} in window", ip, entry.connections);
            return ConnectVerdict::Rejected { retry_in };
        }

        ConnectVerdict::Allowed
    }

    /// Account for a closed connection. Blocked IPs keep their count so
    /// the block math stays honest; the count never goes below zero.
    pub fn track_disconnect(&self, ip: IpAddr) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&ip) {
            if entry.blocked_until.is_none() {
                entry.connections = entry.connections.saturating_sub(1);
            }
        }
    }

    /// Count a rule violation against `ip`. Crossing the threshold emits
    /// the elevated security alert once per entry lifetime.
    pub fn mark_suspicious(&self, ip: IpAddr, reason: &str) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(ip)
            .or_insert_with(|| IpTracker::fresh(Instant::now()));
        note_suspicion(&self.audit, entry, ip, reason);
    }

    /// Suspicious-event count for an IP
    pub fn suspicion_of(&self, ip: IpAddr) -> u32 {
        self.entries
            .read()
            .get(&ip)
            .map(|e| e.suspicious)
            .unwrap_or(0)
    }

    /// Drop expired blocks and idle trackers
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            if let Some(until) = entry.blocked_until {
                if now >= until {
                    entry.blocked_until = None;
                    entry.connections = 0;
                }
            }
            let idle = now.duration_since(entry.window_start) > WINDOW
                && entry.connections == 0
                && entry.blocked_until.is_none();
            // Idle trackers with no suspicion history can go entirely
            !(idle && entry.suspicious == 0)
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Abuse guard dropped {} idle trackers", removed);
        }
    }

    /// Tracked IP count (monitoring and tests)
    pub fn tracked_count(&self) -> usize {
        self.entries.read().len()
    }
}

fn note_suspicion(audit: &AuditLog, entry: &mut IpTracker, ip: IpAddr, reason: &str) {
    entry.suspicious += 1;
    if entry.suspicious >= SUSPICION_ALERT_THRESHOLD && !entry.alerted {
        entry.alerted = true;
        warn!(
            "Elevated suspicion for {}: {} events, last: {}",
            ip, entry.suspicious, reason
        );
        audit.record(
            AuditEntry::new(AuditLevel::Security, "suspicion-threshold")
                .ip(ip)
                .details(json!({ "events": entry.suspicious, "lastReason": reason })),
        );
    }
}
