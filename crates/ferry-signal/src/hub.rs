//! Signaling state machine
//!
//! One handler per inbound event, each walking the same path: limiters,
//! validation, repository and registry updates, replies. Events carrying a
//! share id are serialized per share through a lock map, so two racing
//! receivers cannot both spend a code; events for different shares run in
//! parallel.
//!
//! Misuse never gets a detailed answer. Request-shaped events (upload,
//! join) fail with a typed rejection; relay-shaped events (signal, cancel,
//! complete) from outside a room are dropped without a trace beyond the
//! audit log.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use ferry_core::code::mint_code;
use ferry_core::validate::{check_file_name, check_mime, check_size, is_session_id};
use ferry_core::{FieldCipher, Reject};

use crate::audit::{AuditEntry, AuditLevel, AuditLog};
use crate::caps::{CapVerdict, SessionCaps};
use crate::guard::AbuseGuard;
use crate::limiter::WindowLimiter;
use crate::messages::{ClientEvent, ServerEvent};
use crate::registry::{CodeOutcome, ShareRegistry};
use crate::rooms::PeerMap;
use crate::router::SignalRouter;
use crate::storage::{ShareStatus, ShareStore};

/// All the services one event handler can touch
pub struct SignalHub {
    store: Arc<ShareStore>,
    registry: Arc<ShareRegistry>,
    peers: Arc<PeerMap>,
    router: SignalRouter,
    cipher: Arc<FieldCipher>,
    audit: Arc<AuditLog>,
    guard: Arc<AbuseGuard>,
    caps: Arc<SessionCaps>,
    upload_limiter: Arc<WindowLimiter>,
    join_limiter: Arc<WindowLimiter>,
    /// Per-share serialization points
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SignalHub {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ShareStore>,
        registry: Arc<ShareRegistry>,
        peers: Arc<PeerMap>,
        cipher: Arc<FieldCipher>,
        audit: Arc<AuditLog>,
        guard: Arc<AbuseGuard>,
        caps: Arc<SessionCaps>,
        upload_limiter: Arc<WindowLimiter>,
        join_limiter: Arc<WindowLimiter>,
    ) -> Self {
        let router = SignalRouter::new(peers.clone(), audit.clone(), guard.clone());
        Self {
            store,
            registry,
            peers,
            router,
            cipher,
            audit,
            guard,
            caps,
            upload_limiter,
            join_limiter,
            locks: DashMap::new(),
        }
    }

    /// Dispatch one inbound event from `peer`.
    pub async fn handle_event(&self, peer: &str, event: ClientEvent) {
        match event {
            ClientEvent::UploadInit {
                file_name,
                file_size,
                file_type,
                file_hash,
            } => {
                if let Err(reject) =
                    self.upload_init(peer, &file_name, file_size, &file_type, file_hash).await
                {
                    self.reply_rejection(peer, reject);
                }
            }
            ClientEvent::JoinRoom { file_id, code } => {
                if let Err(reject) = self.join_room(peer, &file_id, &code).await {
                    self.reply_rejection(peer, reject);
                }
            }
            ClientEvent::Signal {
                target,
                data,
                file_id,
            } => {
                // Relay failures are silent; the router records them
                let _ = self.router.relay(peer, &target, &file_id, data);
            }
            ClientEvent::CancelTransfer { file_id, reason } => {
                self.cancel_transfer(peer, &file_id, reason).await;
            }
            ClientEvent::TransferComplete { file_id } => {
                self.transfer_complete(peer, &file_id).await;
            }
        }
    }

    /// An endpoint's connection is gone. Tears down room state, notifies
    /// the surviving peer, and reconciles each affected share. Must run
    /// before the abuse guard's disconnect accounting.
    pub async fn handle_disconnect(&self, peer: &str, ip: std::net::IpAddr) {
        let shares = self.peers.disconnect(peer);

        for share in shares {
            let _guard = self.share_lock(&share).lock_owned().await;

            for other in self.peers.others(&share, peer) {
                self.peers.send(
                    &other,
                    ServerEvent::PeerDisconnected {
                        peer_id: peer.to_string(),
                    },
                );
            }

            if !self.registry.is_sender(&share, peer) {
                continue;
            }

            // The sender is gone; what happens next depends on where the
            // share was in its lifecycle.
            match self.store.find(&share) {
                Ok(Some(row)) => match row.status {
                    ShareStatus::Active => {
                        // Receiver may retry once the sender reshares
                        if let Err(e) = self.store.set_status(&share, ShareStatus::Waiting) {
                            error!("Failed to reset {} to WAITING: {}", share, e);
                        }
                        self.caps.decrement(ip);
                    }
                    ShareStatus::Waiting => {
                        // Nobody can service this share anymore
                        self.registry.remove(&share);
                        self.locks.remove(&share);
                        self.caps.decrement(ip);
                    }
                    ShareStatus::Completed => {}
                },
                Ok(None) => {
                    self.registry.remove(&share);
                    self.locks.remove(&share);
                }
                Err(e) => error!("Disconnect reconciliation failed for {}: {}", share, e),
            }
        }
    }

    async fn upload_init(
        &self,
        peer: &str,
        file_name: &str,
        file_size: u64,
        file_type: &str,
        file_hash: Option<String>,
    ) -> Result<(), Reject> {
        let ip = self.peers.ip_of(peer).ok_or(Reject::Internal)?;

        let decision = self.upload_limiter.check(peer);
        if !decision.allowed {
            self.guard.mark_suspicious(ip, "upload-rate-limit");
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, "upload-rate-limited")
                    .peer(peer)
                    .ip(ip),
            );
            return Err(Reject::RateLimited {
                wait_secs: decision.wait_secs(),
            });
        }

        match self.caps.check(ip) {
            CapVerdict::Allowed => {}
            verdict => {
                self.audit.record(
                    AuditEntry::new(AuditLevel::Warn, "upload-capped")
                        .peer(peer)
                        .ip(ip)
                        .details(json!({ "reason": verdict.reason() })),
                );
                return Err(Reject::SessionCapped {
                    reason: verdict.reason(),
                });
            }
        }

        // The cap counted this share; give the slot back on any failure
        // from here on.
        let result = self
            .create_share(peer, ip, file_name, file_size, file_type, file_hash)
            .await;
        if result.is_err() {
            self.caps.decrement(ip);
        }
        result
    }

    async fn create_share(
        &self,
        peer: &str,
        ip: std::net::IpAddr,
        file_name: &str,
        file_size: u64,
        file_type: &str,
        file_hash: Option<String>,
    ) -> Result<(), Reject> {
        let name =
            check_file_name(file_name).map_err(|e| Reject::InvalidInput(e.to_string()))?;
        let mime = check_mime(file_type).map_err(|e| Reject::InvalidInput(e.to_string()))?;
        let size = check_size(file_size).map_err(|e| Reject::InvalidInput(e.to_string()))?;

        let sealed_name = self.cipher.seal(&name.name).map_err(|e| {
            error!("Metadata seal failed: {}", e);
            Reject::Internal
        })?;
        let sealed_type = self.cipher.seal(&mime.mime).map_err(|e| {
            error!("Metadata seal failed: {}", e);
            Reject::Internal
        })?;

        let code = mint_code();
        let code_hash = hex::encode(Sha256::digest(code.as_bytes()));

        let id = self
            .store
            .create(
                &sealed_name,
                size,
                &sealed_type,
                file_hash.as_deref(),
                Some(&code_hash),
            )
            .map_err(|e| {
                error!("Share create failed: {}", e);
                Reject::Internal
            })?;

        self.registry.register(&id, peer, &code);
        self.peers.join(&id, peer);

        let warnings = collect_warnings(&name.warnings, mime.dangerous);
        info!("Share {} created by {}", id, peer);
        self.audit.record(
            AuditEntry::new(AuditLevel::Info, "share-created")
                .peer(peer)
                .share(&id)
                .ip(ip),
        );

        self.peers.send(
            peer,
            ServerEvent::UploadCreated {
                file_id: id,
                one_time_code: code,
                warnings,
            },
        );
        Ok(())
    }

    async fn join_room(&self, peer: &str, file_id: &str, code: &str) -> Result<(), Reject> {
        let ip = self.peers.ip_of(peer).ok_or(Reject::Internal)?;

        let decision = self.join_limiter.check(peer);
        if !decision.allowed {
            self.guard.mark_suspicious(ip, "join-rate-limit");
            return Err(Reject::RateLimited {
                wait_secs: decision.wait_secs(),
            });
        }

        if !is_session_id(file_id) {
            self.guard.mark_suspicious(ip, "malformed-share-id");
            return Err(Reject::InvalidInput("Malformed share id".into()));
        }

        let _guard = self.share_lock(file_id).lock_owned().await;

        let row = self
            .store
            .find(file_id)
            .map_err(|e| {
                error!("Share lookup failed: {}", e);
                Reject::Internal
            })?
            .ok_or(Reject::NotFound)?;

        if row.status == ShareStatus::Completed {
            return Err(Reject::AlreadyDownloaded);
        }

        let sender = self.registry.sender(file_id).ok_or(Reject::SenderOffline)?;

        match self.registry.verify_code(file_id, code) {
            CodeOutcome::Valid => {}
            CodeOutcome::Missing => return Err(Reject::SenderOffline),
            CodeOutcome::Mismatch => {
                self.guard.mark_suspicious(ip, "bad-code");
                self.audit.record(
                    AuditEntry::new(AuditLevel::Security, "join-bad-code")
                        .peer(peer)
                        .share(file_id)
                        .ip(ip),
                );
                return Err(Reject::InvalidCode("Invalid code"));
            }
            CodeOutcome::AlreadyUsed => {
                return Err(Reject::InvalidCode("Code already used"));
            }
        }

        self.store
            .set_status(file_id, ShareStatus::Active)
            .map_err(|e| {
                error!("Status update failed for {}: {}", file_id, e);
                Reject::Internal
            })?;

        if !self.peers.join(file_id, peer) {
            return Err(Reject::InvalidInput("Share already has a receiver".into()));
        }

        // Metadata goes back out in the clear over the endpoint channel;
        // danger flags are recomputed from the decrypted values.
        let plain_name = self.cipher.open(&row.file_name);
        let plain_type = self.cipher.open(&row.file_type);
        let (dangerous, warnings) = match (check_file_name(&plain_name), check_mime(&plain_type)) {
            (Ok(name), Ok(mime)) => (
                name.dangerous || mime.dangerous,
                collect_warnings(&name.warnings, mime.dangerous),
            ),
            _ => (false, None),
        };

        self.peers.send(
            peer,
            ServerEvent::FileMeta {
                file_name: plain_name,
                file_size: row.file_size.to_string(),
                file_type: plain_type,
                file_hash: row.file_hash.clone(),
                is_dangerous: dangerous.then_some(true),
                warnings,
            },
        );
        self.peers.send(
            &sender,
            ServerEvent::ReceiverJoined {
                receiver_id: peer.to_string(),
            },
        );

        info!("Endpoint {} joined share {}", peer, file_id);
        self.audit.record(
            AuditEntry::new(AuditLevel::Info, "receiver-joined")
                .peer(peer)
                .share(file_id)
                .ip(ip),
        );
        Ok(())
    }

    async fn cancel_transfer(&self, peer: &str, file_id: &str, reason: Option<String>) {
        if !self.peers.is_member(file_id, peer) {
            self.drop_out_of_room(peer, file_id, "cancel-out-of-room");
            return;
        }

        let reason = reason.unwrap_or_else(|| "Cancelled by peer".to_string());
        for other in self.peers.others(file_id, peer) {
            self.peers.send(
                &other,
                ServerEvent::TransferCancelled {
                    reason: reason.clone(),
                },
            );
        }

        debug!("Transfer {} cancelled by {}", file_id, peer);
        self.audit.record(
            AuditEntry::new(AuditLevel::Info, "transfer-cancelled")
                .peer(peer)
                .share(file_id),
        );
    }

    async fn transfer_complete(&self, peer: &str, file_id: &str) {
        if !self.peers.is_member(file_id, peer) {
            self.drop_out_of_room(peer, file_id, "complete-out-of-room");
            return;
        }

        let _guard = self.share_lock(file_id).lock_owned().await;

        // Free the sender's cap slot while we still know who the sender is
        if let Some(sender) = self.registry.sender(file_id) {
            if let Some(sender_ip) = self.peers.ip_of(&sender) {
                self.caps.decrement(sender_ip);
            }
        }

        // Delete rather than mark: a finished share must not be joinable
        // again, even before the sweeper runs.
        if let Err(e) = self.store.delete(file_id) {
            error!("Failed to delete completed share {}: {}", file_id, e);
        }
        self.registry.remove(file_id);
        self.peers.remove_room(file_id);
        self.locks.remove(file_id);

        info!("Share {} completed", file_id);
        self.audit.record(
            AuditEntry::new(AuditLevel::Info, "transfer-complete")
                .peer(peer)
                .share(file_id),
        );
    }

    fn reply_rejection(&self, peer: &str, reject: Reject) {
        if matches!(reject, Reject::Internal) {
            self.audit
                .record(AuditEntry::new(AuditLevel::Error, "internal-error").peer(peer));
        }
        self.peers.send(peer, ServerEvent::rejection(&reject));
    }

    fn drop_out_of_room(&self, peer: &str, file_id: &str, reason: &str) {
        let mut entry = AuditEntry::new(AuditLevel::Security, reason)
            .peer(peer)
            .share(file_id);
        if let Some(ip) = self.peers.ip_of(peer) {
            entry = entry.ip(ip);
            self.guard.mark_suspicious(ip, reason);
        }
        self.audit.record(entry);
    }

    fn share_lock(&self, share: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(share.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn collect_warnings(name_warnings: &[String], mime_dangerous: bool) -> Option<Vec<String>> {
    let mut warnings = name_warnings.to_vec();
    if mime_dangerous {
        warnings.push("The reported file type is associated with executable content".to_string());
    }
    if warnings.is_empty() {
        None
    } else {
        Some(warnings)
    }
}
