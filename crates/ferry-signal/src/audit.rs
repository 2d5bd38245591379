//! Bounded in-memory audit log
//!
//! A ring of structured events for operators: who connected, what got
//! rejected, which IPs tripped the abuse thresholds. Capped at a fixed
//! entry count so a flood cannot eat the heap, and trimmed by the sweeper
//! on the retention window.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

/// Maximum entries held before the oldest are dropped
pub const MAX_ENTRIES: usize = 10_000;

/// Severity of an audit entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
    Security,
}

/// One structured audit event
#[derive(Clone, Debug, Serialize)]
pub struct AuditEntry {
    #[serde(skip)]
    pub at: SystemTime,
    pub level: AuditLevel,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(level: AuditLevel, event: impl Into<String>) -> Self {
        Self {
            at: SystemTime::now(),
            level,
            event: event.into(),
            peer: None,
            share: None,
            ip: None,
            details: None,
        }
    }

    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn share(mut self, share: impl Into<String>) -> Self {
        self.share = Some(share.into());
        self
    }

    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The bounded ring itself
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }

    /// Append an entry, evicting the oldest past capacity
    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent `n` entries, newest last
    pub fn last(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        entries.iter().rev().take(n).rev().cloned().collect()
    }

    /// Most recent `n` entries at one level
    pub fn last_by_level(&self, n: usize, level: AuditLevel) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        entries
            .iter()
            .rev()
            .filter(|e| e.level == level)
            .take(n)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Security events recorded at or after `since`
    pub fn security_since(&self, since: SystemTime) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|e| e.level == AuditLevel::Security && e.at >= since)
            .cloned()
            .collect()
    }

    /// Drop entries older than `age`. Returns how many went.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let cutoff = SystemTime::now() - age;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.at >= cutoff);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
