//! Background cleanup
//!
//! Two timers. The hourly pass purges expired shares and registry entries
//! and trims the audit log to its retention window. A faster five-minute
//! pass keeps the abuse guard's map small so a wave of blocked IPs does
//! not linger in memory for an hour.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::audit::AuditLog;
use crate::caps::SessionCaps;
use crate::guard::AbuseGuard;
use crate::registry::ShareRegistry;
use crate::storage::{current_timestamp, ShareStatus, ShareStore};
use crate::{AUDIT_RETENTION_SECS, SHARE_MAX_AGE_SECS};

/// Full sweep interval (60 minutes)
pub const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Abuse-guard-only sweep interval (5 minutes)
pub const GUARD_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Periodic metadata reaper
pub struct Sweeper {
    store: Arc<ShareStore>,
    registry: Arc<ShareRegistry>,
    guard: Arc<AbuseGuard>,
    caps: Arc<SessionCaps>,
    audit: Arc<AuditLog>,
}

impl Sweeper {
    pub fn new(
        store: Arc<ShareStore>,
        registry: Arc<ShareRegistry>,
        guard: Arc<AbuseGuard>,
        caps: Arc<SessionCaps>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            registry,
            guard,
            caps,
            audit,
        }
    }

    /// Launch both sweep loops. Call once at startup.
    pub fn spawn(self: Arc<Self>) {
        let guard = self.guard.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(GUARD_SWEEP_INTERVAL_SECS));
            loop {
                tick.tick().await;
                guard.cleanup();
            }
        });

        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                tick.tick().await;
                self.sweep_once();
            }
        });
    }

    /// One full sweep pass
    pub fn sweep_once(&self) {
        let cutoff = current_timestamp() - SHARE_MAX_AGE_SECS as i64;
        match self.store.delete_older_than(
            cutoff,
            &[ShareStatus::Waiting, ShareStatus::Completed],
        ) {
            Ok(purged) if purged > 0 => info!("Sweeper purged {} expired shares", purged),
            Ok(_) => {}
            Err(e) => error!("Share purge failed: {}", e),
        }

        let purged = self
            .registry
            .purge_older_than(Duration::from_secs(SHARE_MAX_AGE_SECS));
        if purged > 0 {
            info!("Sweeper purged {} registry entries", purged);
        }

        self.guard.cleanup();
        self.caps.cleanup();

        let evicted = self
            .audit
            .evict_older_than(Duration::from_secs(AUDIT_RETENTION_SECS));
        if evicted > 0 {
            info!("Sweeper evicted {} audit entries", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEntry, AuditLevel};

    fn sweeper() -> Sweeper {
        let audit = Arc::new(AuditLog::new());
        Sweeper::new(
            Arc::new(ShareStore::in_memory().unwrap()),
            Arc::new(ShareRegistry::new()),
            Arc::new(AbuseGuard::new(audit.clone())),
            Arc::new(SessionCaps::new()),
            audit,
        )
    }

    #[test]
    fn test_sweep_purges_expired_shares() {
        let s = sweeper();
        let old = s.store.create("n", 1, "t", None, None).unwrap();
        let fresh = s.store.create("n", 1, "t", None, None).unwrap();
        s.store
            .backdate(&old, current_timestamp() - (SHARE_MAX_AGE_SECS as i64 + 1))
            .unwrap();

        s.sweep_once();

        assert!(s.store.find(&old).unwrap().is_none());
        assert!(s.store.find(&fresh).unwrap().is_some());
    }

    #[test]
    fn test_sweep_spares_active_shares() {
        let s = sweeper();
        let id = s.store.create("n", 1, "t", None, None).unwrap();
        s.store.set_status(&id, ShareStatus::Active).unwrap();
        s.store
            .backdate(&id, current_timestamp() - (SHARE_MAX_AGE_SECS as i64 + 1))
            .unwrap();

        s.sweep_once();

        // ACTIVE rows ride out the sweep; an interrupted transfer is only
        // reaped once it falls back to WAITING or COMPLETED
        assert!(s.store.find(&id).unwrap().is_some());
    }

    #[test]
    fn test_sweep_keeps_recent_audit_entries() {
        let s = sweeper();
        s.audit
            .record(AuditEntry::new(AuditLevel::Security, "blocked"));
        s.sweep_once();
        assert_eq!(s.audit.len(), 1);
    }

    #[test]
    fn test_sweep_purges_registry() {
        let s = sweeper();
        s.registry.register("s1", "e1", "AAAAAA");
        s.sweep_once();
        // Entry is fresh, stays
        assert_eq!(s.registry.len(), 1);
    }
}
