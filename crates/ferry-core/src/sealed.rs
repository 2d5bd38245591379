//! Metadata field encryption
//!
//! Filenames and MIME types are encrypted before they ever reach storage,
//! so a leaked database says nothing about what was shared. The envelope is
//! `nonce:tag:body` with each part hex encoded, AES-256-GCM underneath.
//!
//! Decryption is deliberately forgiving: anything that does not look like
//! an envelope, or fails authentication, is passed through unchanged. Rows
//! written before encryption was enabled keep working during migration.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::{error, warn};

use crate::error::CoreError;

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
const TAG_LEN: usize = 16;

/// Fixed salt for stretching short key material. Changing this invalidates
/// every envelope written with a stretched key.
const KDF_SALT: &[u8] = b"ferry-metadata-kdf-v1";

/// Argon2id parameters for key stretching
const KDF_MEMORY_KIB: u32 = 19_456;
const KDF_ITERATIONS: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

/// Authenticated encryption for metadata fields.
///
/// Without key material the cipher runs in passthrough mode: values go to
/// storage as-is. Production configurations refuse to start that way.
pub struct FieldCipher {
    cipher: Option<Aes256Gcm>,
}

impl FieldCipher {
    /// Build a cipher from configured key material.
    ///
    /// A 64-character hex value is used directly as the 32-byte key.
    /// Anything shorter is stretched with Argon2id and a fixed salt.
    /// No material at all is an error in production and a loudly logged
    /// passthrough otherwise.
    pub fn from_key_material(
        material: Option<&str>,
        production: bool,
    ) -> Result<Self, CoreError> {
        let material = match material {
            Some(m) => m,
            None => {
                if production {
                    return Err(CoreError::Config(
                        "metadata encryption key is required in production".into(),
                    ));
                }
                warn!("metadata encryption disabled, fields will be stored in plaintext");
                return Ok(Self { cipher: None });
            }
        };

        let key = if material.len() == 64 && material.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(material)
                .map_err(|e| CoreError::Config(format!("bad hex encryption key: {}", e)))?;
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            key
        } else {
            derive_key(material)?
        };

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CoreError::Config("encryption key has wrong length".into()))?;

        Ok(Self {
            cipher: Some(cipher),
        })
    }

    /// Whether values actually get encrypted
    pub fn is_active(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt a field value into the `nonce:tag:body` envelope.
    pub fn seal(&self, plain: &str) -> Result<String, CoreError> {
        let cipher = match &self.cipher {
            Some(c) => c,
            None => return Ok(plain.to_string()),
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| CoreError::Crypto(format!("nonce generation failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plain.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|_| CoreError::Crypto("encryption failed".into()))?;

        // aes-gcm appends the tag to the ciphertext
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(body)
        ))
    }

    /// Decrypt an envelope back to the original value.
    ///
    /// Returns the input unchanged when the value is not an envelope or
    /// fails to decrypt.
    pub fn open(&self, value: &str) -> String {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 3 {
            // Not an envelope, treat as legacy plaintext
            return value.to_string();
        }

        let cipher = match &self.cipher {
            Some(c) => c,
            None => {
                warn!("sealed value present but encryption is disabled, passing through");
                return value.to_string();
            }
        };

        let decoded = (
            hex::decode(parts[0]),
            hex::decode(parts[1]),
            hex::decode(parts[2]),
        );
        let (nonce_bytes, tag, body) = match decoded {
            (Ok(n), Ok(t), Ok(b)) if n.len() == NONCE_LEN && t.len() == TAG_LEN => (n, t, b),
            _ => {
                warn!("malformed envelope, passing value through");
                return value.to_string();
            }
        };

        let mut sealed = body;
        sealed.extend_from_slice(&tag);

        match cipher.decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_slice()) {
            Ok(plain) => match String::from_utf8(plain) {
                Ok(s) => s,
                Err(_) => {
                    error!("decrypted field is not valid UTF-8, passing envelope through");
                    value.to_string()
                }
            },
            Err(_) => {
                error!("field decryption failed, passing envelope through");
                value.to_string()
            }
        }
    }
}

/// Stretch a short passphrase into a 32-byte key with Argon2id
fn derive_key(material: &str) -> Result<[u8; 32], CoreError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_PARALLELISM, Some(32))
        .map_err(|e| CoreError::Config(format!("bad KDF parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(material.as_bytes(), KDF_SALT, &mut key)
        .map_err(|e| CoreError::Config(format!("key derivation failed: {}", e)))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_key_cipher() -> FieldCipher {
        let key = "a".repeat(64);
        FieldCipher::from_key_material(Some(&key), true).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = hex_key_cipher();
        let sealed = cipher.seal("photo.jpg").unwrap();
        assert_ne!(sealed, "photo.jpg");
        assert_eq!(sealed.split(':').count(), 3);
        assert_eq!(cipher.open(&sealed), "photo.jpg");
    }

    #[test]
    fn test_no_plaintext_in_envelope() {
        let cipher = hex_key_cipher();
        let sealed = cipher.seal("secret-report.pdf").unwrap();
        assert!(!sealed.contains("secret"));
        assert!(!sealed.contains("pdf"));
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = hex_key_cipher();
        let a = cipher.seal("same input").unwrap();
        let b = cipher.seal("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_passthrough_without_separators() {
        let cipher = hex_key_cipher();
        assert_eq!(cipher.open("plain name.txt"), "plain name.txt");
        assert_eq!(cipher.open("one:colon"), "one:colon");
        assert_eq!(cipher.open("a:b:c:d"), "a:b:c:d");
    }

    #[test]
    fn test_passthrough_on_garbage_envelope() {
        let cipher = hex_key_cipher();
        assert_eq!(cipher.open("zz:zz:zz"), "zz:zz:zz");
        // Well-formed hex but wrong key material
        let other = FieldCipher::from_key_material(Some(&"b".repeat(64)), true).unwrap();
        let sealed = other.seal("hello").unwrap();
        assert_eq!(cipher.open(&sealed), sealed);
    }

    #[test]
    fn test_stretched_key_round_trip() {
        let cipher = FieldCipher::from_key_material(Some("short passphrase"), true).unwrap();
        let sealed = cipher.seal("video.mp4").unwrap();
        assert_eq!(cipher.open(&sealed), "video.mp4");
    }

    #[test]
    fn test_production_requires_material() {
        assert!(FieldCipher::from_key_material(None, true).is_err());
        let dev = FieldCipher::from_key_material(None, false).unwrap();
        assert!(!dev.is_active());
        assert_eq!(dev.seal("x.txt").unwrap(), "x.txt");
    }
}
