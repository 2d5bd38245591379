//! Ferry Signal Server
//!
//! Signaling and session coordination for browser-to-browser file
//! transfer. Two endpoints, a sender and a receiver, meet here to exchange
//! opaque connection-negotiation payloads; the actual file bytes flow over
//! the direct peer connection and never touch this server.
//!
//! # Protocol
//!
//! 1. Sender announces a file and receives a share id plus a one-time code
//! 2. Receiver joins the share by presenting the code
//! 3. Server relays negotiation payloads between the two endpoints
//! 4. Peers establish their direct connection and transfer out of band
//! 5. Either side reports completion and the share is deleted

pub mod audit;
pub mod caps;
pub mod guard;
pub mod hub;
pub mod limiter;
pub mod messages;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod server;
pub mod storage;
pub mod sweeper;

pub use audit::{AuditLevel, AuditLog};
pub use hub::SignalHub;
pub use messages::{ClientEvent, ServerEvent};
pub use registry::ShareRegistry;
pub use rooms::PeerMap;
pub use server::{serve, ServerState};
pub use storage::{ShareStatus, ShareStore};

/// Shares older than this are purged regardless of status (24 hours)
pub const SHARE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Audit entries are kept for this long (7 days)
pub const AUDIT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// At most two endpoints ever share a room: the sender and one receiver
pub const MAX_PEERS_PER_ROOM: usize = 2;
