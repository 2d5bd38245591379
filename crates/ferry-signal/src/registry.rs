//! In-memory share registry
//!
//! Volatile companion to the repository: which live endpoint owns each
//! share, the one-time code, and whether it has been spent. Entries die
//! with the process; the repository row stays the source of truth.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use ferry_core::code::normalize_code;
use tracing::debug;

/// Outcome of presenting a code for a share
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeOutcome {
    /// Match, code now spent
    Valid,
    /// No entry for the share
    Missing,
    /// Wrong code
    Mismatch,
    /// Code was already spent
    AlreadyUsed,
}

struct ShareEntry {
    sender: String,
    code: String,
    used: bool,
    created_at: SystemTime,
}

/// Registry of live shares, keyed by share id
#[derive(Default)]
pub struct ShareRegistry {
    entries: DashMap<String, ShareEntry>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sender endpoint and code for a fresh share.
    /// Exactly one sender per share; a second registration replaces the
    /// first, which only happens if a share id were reused.
    pub fn register(&self, share_id: &str, sender: &str, code: &str) {
        self.entries.insert(
            share_id.to_string(),
            ShareEntry {
                sender: sender.to_string(),
                code: code.to_string(),
                used: false,
                created_at: SystemTime::now(),
            },
        );
    }

    /// The sender endpoint for a share, if registered
    pub fn sender(&self, share_id: &str) -> Option<String> {
        self.entries.get(share_id).map(|e| e.sender.clone())
    }

    /// Authorization primitive for sender-privileged actions
    pub fn is_sender(&self, share_id: &str, peer: &str) -> bool {
        self.entries
            .get(share_id)
            .map(|e| e.sender == peer)
            .unwrap_or(false)
    }

    /// Check a presented code. Success spends the code permanently;
    /// this transition happens at most once per share.
    pub fn verify_code(&self, share_id: &str, input: &str) -> CodeOutcome {
        let mut entry = match self.entries.get_mut(share_id) {
            Some(e) => e,
            None => return CodeOutcome::Missing,
        };

        if entry.used {
            return CodeOutcome::AlreadyUsed;
        }
        if normalize_code(input) != entry.code {
            return CodeOutcome::Mismatch;
        }

        entry.used = true;
        CodeOutcome::Valid
    }

    /// Drop a share's entry
    pub fn remove(&self, share_id: &str) {
        self.entries.remove(share_id);
    }

    /// Shares registered by a given endpoint
    pub fn for_peer(&self, peer: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.value().sender == peer)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop entries older than `age`. Returns how many went.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let cutoff = SystemTime::now() - age;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_at >= cutoff);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!("Purged {} stale registry entries", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
