//! Wire events for the endpoint channel
//!
//! Everything crossing the WebSocket is a tagged JSON object. Inbound and
//! outbound directions are separate enums so the compiler catches a server
//! accidentally consuming its own output. Negotiation payloads stay
//! `serde_json::Value`: the server forwards them verbatim and never looks
//! inside.
//!
//! File sizes are 64-bit and JSON numbers lose precision past 2^53, so
//! sizes go out as strings. Inbound we accept either form.

use serde::{Deserialize, Deserializer, Serialize};

use ferry_core::Reject;

/// Events sent by an endpoint to the server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Sender announces a file
    UploadInit {
        file_name: String,
        #[serde(deserialize_with = "size_from_number_or_string")]
        file_size: u64,
        file_type: String,
        #[serde(default)]
        file_hash: Option<String>,
    },

    /// Receiver presents the one-time code for a share
    JoinRoom { file_id: String, code: String },

    /// Opaque negotiation payload for the named peer
    Signal {
        target: String,
        data: serde_json::Value,
        file_id: String,
    },

    /// Either side abandons the transfer
    CancelTransfer {
        file_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Receiver confirms the transfer finished
    TransferComplete { file_id: String },
}

/// Events sent by the server to an endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Share created, code minted
    UploadCreated {
        file_id: String,
        one_time_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warnings: Option<Vec<String>>,
    },

    /// A receiver joined the sender's share
    ReceiverJoined { receiver_id: String },

    /// File metadata for a receiver that just joined
    FileMeta {
        file_name: String,
        /// Numeric string, full 64-bit precision
        file_size: String,
        file_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_dangerous: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warnings: Option<Vec<String>>,
    },

    /// Relayed negotiation payload
    Signal {
        from: String,
        data: serde_json::Value,
    },

    /// Counterpart cancelled the transfer
    TransferCancelled { reason: String },

    /// Counterpart's connection is gone
    PeerDisconnected { peer_id: String },

    /// Request denied
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid_code: Option<bool>,
    },
}

impl ClientEvent {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Build the wire error event for a denial
    pub fn rejection(reject: &Reject) -> Self {
        ServerEvent::Error {
            message: reject.message(),
            invalid_code: reject.is_code_failure().then_some(true),
        }
    }
}

/// Accept a size as a JSON number or a numeric string
fn size_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("fileSize is not a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_init_parsing() {
        let json = r#"{"type":"upload-init","fileName":"photo.jpg","fileSize":10240,"fileType":"image/jpeg"}"#;
        match ClientEvent::from_json(json).unwrap() {
            ClientEvent::UploadInit {
                file_name,
                file_size,
                file_type,
                file_hash,
            } => {
                assert_eq!(file_name, "photo.jpg");
                assert_eq!(file_size, 10240);
                assert_eq!(file_type, "image/jpeg");
                assert!(file_hash.is_none());
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_size_accepted_as_string() {
        // 2^53 + 1, not representable as an f64
        let json = r#"{"type":"upload-init","fileName":"big.bin","fileSize":"9007199254740993","fileType":"application/octet-stream"}"#;
        match ClientEvent::from_json(json).unwrap() {
            ClientEvent::UploadInit { file_size, .. } => {
                assert_eq!(file_size, 9_007_199_254_740_993);
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_negative_size_rejected() {
        let json =
            r#"{"type":"upload-init","fileName":"a.txt","fileSize":-5,"fileType":"text/plain"}"#;
        assert!(ClientEvent::from_json(json).is_err());
        let json =
            r#"{"type":"upload-init","fileName":"a.txt","fileSize":"-5","fileType":"text/plain"}"#;
        assert!(ClientEvent::from_json(json).is_err());
    }

    #[test]
    fn test_signal_payload_stays_opaque() {
        let json = r#"{"type":"signal","target":"ab12","data":{"sdp":"v=0...","type":"offer"},"fileId":"x"}"#;
        match ClientEvent::from_json(json).unwrap() {
            ClientEvent::Signal { data, .. } => {
                assert_eq!(data["type"], "offer");
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_file_meta_size_is_string() {
        let event = ServerEvent::FileMeta {
            file_name: "photo.jpg".into(),
            file_size: "10240".into(),
            file_type: "image/jpeg".into(),
            file_hash: None,
            is_dangerous: None,
            warnings: None,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""fileSize":"10240""#));
        assert!(json.contains(r#""type":"file-meta""#));
        // Absent optionals stay off the wire
        assert!(!json.contains("fileHash"));
        assert!(!json.contains("isDangerous"));
    }

    #[test]
    fn test_rejection_event() {
        let event = ServerEvent::rejection(&Reject::InvalidCode("Invalid code"));
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""invalidCode":true"#));
        assert!(json.contains("Invalid code"));

        let event = ServerEvent::rejection(&Reject::NotFound);
        let json = event.to_json().unwrap();
        assert!(!json.contains("invalidCode"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientEvent::from_json(r#"{"type":"make-coffee"}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
    }
}
