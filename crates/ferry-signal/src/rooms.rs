//! Endpoint and room tracking
//!
//! Every live WebSocket connection is an endpoint with an opaque id, an
//! outbound event queue, and the IP it arrived from. A room is the set of
//! endpoints attached to one share id: the sender, and later at most one
//! receiver. Room membership is the only authorization the relay path
//! consults, so the maps here are the security boundary.

use std::collections::HashSet;
use std::net::IpAddr;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::messages::ServerEvent;
use crate::MAX_PEERS_PER_ROOM;

/// Handle to a connected endpoint
#[derive(Clone)]
pub struct PeerHandle {
    /// Outbound queue; the connection task drains it in order
    pub tx: mpsc::UnboundedSender<ServerEvent>,
    pub ip: IpAddr,
}

/// Connection and room state
#[derive(Default)]
pub struct PeerMap {
    peers: DashMap<String, PeerHandle>,
    /// share id -> endpoints in the room
    rooms: DashMap<String, HashSet<String>>,
    /// endpoint -> shares it has joined
    joined: DashMap<String, HashSet<String>>,
}

impl PeerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection
    pub fn connect(&self, peer: &str, handle: PeerHandle) {
        self.peers.insert(peer.to_string(), handle);
    }

    /// Tear down a connection. Removes the endpoint from every room and
    /// returns the shares it was in, for the caller to run notifications.
    pub fn disconnect(&self, peer: &str) -> Vec<String> {
        self.peers.remove(peer);

        let shares: Vec<String> = self
            .joined
            .remove(peer)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();

        for share in &shares {
            if let Some(mut members) = self.rooms.get_mut(share) {
                members.remove(peer);
                if members.is_empty() {
                    drop(members);
                    self.rooms.remove(share);
                }
            }
        }

        debug!("Endpoint {} disconnected from {} rooms", peer, shares.len());
        shares
    }

    /// Put an endpoint in a share's room. Joining twice is a no-op;
    /// a full room refuses.
    pub fn join(&self, share: &str, peer: &str) -> bool {
        let mut members = self.rooms.entry(share.to_string()).or_default();
        if members.contains(peer) {
            return true;
        }
        if members.len() >= MAX_PEERS_PER_ROOM {
            return false;
        }
        members.insert(peer.to_string());
        drop(members);

        self.joined
            .entry(peer.to_string())
            .or_default()
            .insert(share.to_string());
        true
    }

    /// Is this endpoint in this share's room?
    pub fn is_member(&self, share: &str, peer: &str) -> bool {
        self.rooms
            .get(share)
            .map(|members| members.contains(peer))
            .unwrap_or(false)
    }

    /// Room members other than `peer`
    pub fn others(&self, share: &str, peer: &str) -> Vec<String> {
        self.rooms
            .get(share)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.as_str() != peer)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop a room entirely (share finished or purged)
    pub fn remove_room(&self, share: &str) {
        if let Some((_, members)) = self.rooms.remove(share) {
            for member in members {
                if let Some(mut set) = self.joined.get_mut(&member) {
                    set.remove(share);
                }
            }
        }
    }

    /// Is the endpoint currently connected?
    pub fn is_connected(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    /// IP the endpoint connected from
    pub fn ip_of(&self, peer: &str) -> Option<IpAddr> {
        self.peers.get(peer).map(|h| h.ip)
    }

    /// Queue an event for an endpoint. Returns false when the endpoint is
    /// gone; events for dead endpoints just evaporate.
    pub fn send(&self, peer: &str, event: ServerEvent) -> bool {
        match self.peers.get(peer) {
            Some(handle) => handle.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
