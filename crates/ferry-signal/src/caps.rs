//! Per-IP session ceilings
//!
//! Two limits on an hourly window: how many shares an IP may have open at
//! once, and how many it may create per hour. The token buckets catch
//! bursts; this catches slow accumulation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

/// Rolling window for the creation ceiling
const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Concurrently open shares per IP
const MAX_CONCURRENT: u32 = 10;

/// Shares created per IP per window
const MAX_PER_HOUR: u32 = 20;

/// Why a share creation was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapVerdict {
    Allowed,
    /// Too many shares open right now
    ConcurrentLimit,
    /// Too many shares created this hour
    HourlyLimit,
}

impl CapVerdict {
    /// Machine-readable reason for rejections
    pub fn reason(&self) -> &'static str {
        match self {
            CapVerdict::Allowed => "allowed",
            CapVerdict::ConcurrentLimit => "Too many simultaneous shares from this address",
            CapVerdict::HourlyLimit => "Hourly share limit reached for this address",
        }
    }
}

struct IpSessions {
    active: u32,
    created: u32,
    window_start: Instant,
}

/// Concurrency and hourly caps, keyed by IP
#[derive(Default)]
pub struct SessionCaps {
    entries: RwLock<HashMap<IpAddr, IpSessions>>,
}

impl SessionCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate one share creation. Allowing counts it immediately.
    pub fn check(&self, ip: IpAddr) -> CapVerdict {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> CapVerdict {
        let mut entries = self.entries.write();
        let entry = entries.entry(ip).or_insert(IpSessions {
            active: 0,
            created: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > WINDOW {
            entry.created = 0;
            entry.window_start = now;
        }

        if entry.active >= MAX_CONCURRENT {
            return CapVerdict::ConcurrentLimit;
        }
        if entry.created >= MAX_PER_HOUR {
            return CapVerdict::HourlyLimit;
        }

        entry.active += 1;
        entry.created += 1;
        CapVerdict::Allowed
    }

    /// A share from `ip` finished or was purged
    pub fn decrement(&self, ip: IpAddr) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&ip) {
            entry.active = entry.active.saturating_sub(1);
        }
    }

    /// Drop entries with nothing open once their window has lapsed
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.active > 0 || now.duration_since(e.window_start) <= WINDOW);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Session caps dropped {} idle entries", removed);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.read().len()
    }
}
