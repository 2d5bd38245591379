//! Ferry Core - Shared types, validation, and cryptographic utilities
//!
//! This crate contains the foundational pieces used by the Ferry signaling
//! server and its tests. It has no networking or storage code.

pub mod code;
pub mod config;
pub mod error;
pub mod sealed;
pub mod turn;
pub mod validate;

pub use code::{mint_code, normalize_code, CODE_ALPHABET, CODE_LENGTH};
pub use config::{Config, ConfigError, TurnConfig};
pub use error::{CoreError, Reject};
pub use sealed::FieldCipher;
pub use turn::{ice_servers, IceServer};

/// Maximum accepted file size in bytes (100 GiB)
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Maximum filename length in bytes after sanitization
pub const MAX_FILENAME_LEN: usize = 255;

/// Maximum MIME type length in bytes
pub const MAX_MIME_LEN: usize = 100;
