//! Time-limited relay credentials
//!
//! The TURN relay authenticates clients with the long-term credential
//! mechanism: we mint a username carrying an expiry timestamp and derive
//! the password as HMAC-SHA1 over it with the shared secret. The relay
//! recomputes the same MAC, so no user database is involved.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::error;

use crate::config::TurnConfig;
use crate::error::CoreError;

type HmacSha1 = Hmac<Sha1>;

/// Public STUN server advertised to every client
pub const PUBLIC_STUN: &str = "stun:stun.l.google.com:19302";

/// Credential lifetime (24 hours)
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// User tag embedded in minted usernames
const USER_TAG: &str = "ferry";

/// One connectivity-establishment server entry, wire-shaped for clients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Mint a `(username, credential)` pair valid for `ttl`.
pub fn mint_credentials(secret: &str, ttl: Duration) -> Result<(String, String), CoreError> {
    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CoreError::Crypto("system clock before epoch".into()))?
        .as_secs()
        + ttl.as_secs();

    let username = format!("{}:{}", expiry, USER_TAG);

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::Crypto("bad TURN secret".into()))?;
    mac.update(username.as_bytes());
    let credential = BASE64.encode(mac.finalize().into_bytes());

    Ok((username, credential))
}

/// Build the server list handed to clients.
///
/// Always contains the public STUN entry. With a relay configured, adds a
/// STUN and UDP+TCP TURN pair sharing one minted credential, plus a TLS
/// entry when enabled. Falls back to STUN-only if minting fails; clients
/// must always get an answer.
pub fn ice_servers(turn: Option<&TurnConfig>) -> Vec<IceServer> {
    let mut servers = vec![IceServer::stun(PUBLIC_STUN)];

    let turn = match turn {
        Some(t) => t,
        None => return servers,
    };

    let (username, credential) = match mint_credentials(&turn.secret, CREDENTIAL_TTL) {
        Ok(pair) => pair,
        Err(e) => {
            error!("TURN credential minting failed, serving STUN only: {}", e);
            return servers;
        }
    };

    servers.push(IceServer::stun(format!("stun:{}", turn.host)));
    servers.push(IceServer {
        urls: vec![
            format!("turn:{}?transport=udp", turn.host),
            format!("turn:{}?transport=tcp", turn.host),
        ],
        username: Some(username.clone()),
        credential: Some(credential.clone()),
    });

    if turn.tls_enabled {
        let host = turn.host.split(':').next().unwrap_or(turn.host.as_str());
        servers.push(IceServer {
            urls: vec![format!("turns:{}:5349?transport=tcp", host)],
            username: Some(username),
            credential: Some(credential),
        });
    }

    servers
}
