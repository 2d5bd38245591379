//! Input validation and sanitization
//!
//! Everything a client sends is hostile until it has been through here.
//! Filenames get sanitized rather than rejected where possible, since the
//! sender's OS may legitimately produce characters we do not want to carry.
//! Dangerous content types are flagged, never blocked: the receiver decides
//! whether to accept an executable, the server only warns.

use thiserror::Error;

use crate::{MAX_FILENAME_LEN, MAX_FILE_SIZE, MAX_MIME_LEN};

/// File extensions that commonly carry executable or script content.
/// The last (or masked second-to-last) dot segment is compared against
/// this set case-insensitively.
pub const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "bat", "cmd", "com", "scr", "pif", "vbs", "js", "jse", "wsf", "wsh", "msi",
    "msp", "hta", "cpl", "jar", "ps1", "psm1", "reg", "vb", "vbe", "ws", "application",
    "gadget", "msc", "lnk",
];

/// MIME types associated with executable payloads. Substring match, flag
/// only.
pub const SUSPICIOUS_MIME: &[&str] = &[
    "application/x-msdownload",
    "application/x-msdos-program",
    "application/x-executable",
    "application/x-bat",
    "application/x-sh",
    "text/x-script.python",
];

/// Validation failures. These become `invalid-input` rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    #[error("file name is required")]
    EmptyFileName,

    #[error("file name contains no usable characters")]
    UnusableFileName,

    #[error("file size must be greater than zero")]
    ZeroSize,

    #[error("file size exceeds the {} byte limit", MAX_FILE_SIZE)]
    TooLarge,

    #[error("file type is required")]
    EmptyMime,

    #[error("malformed session id")]
    BadSessionId,

    #[error("endpoint id is required")]
    EmptyPeerId,
}

/// A sanitized filename plus what we learned about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedName {
    pub name: String,
    pub dangerous: bool,
    pub warnings: Vec<String>,
}

/// A normalized MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedMime {
    pub mime: String,
    pub dangerous: bool,
}

/// Sanitize and vet a filename.
pub fn check_file_name(raw: &str) -> Result<CheckedName, ValidateError> {
    if raw.is_empty() {
        return Err(ValidateError::EmptyFileName);
    }

    // Strip traversal sequences entirely, then neutralize path separators,
    // shell-hostile punctuation, and control bytes.
    let stripped = raw.replace("..", "");
    let mut name = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        let replaced = match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        };
        name.push(replaced);
    }

    let name = truncate_bytes(&name, MAX_FILENAME_LEN);
    if name.is_empty() {
        return Err(ValidateError::UnusableFileName);
    }

    let mut warnings = Vec::new();
    let mut dangerous = false;
    if let Some(ext) = dangerous_extension(&name) {
        dangerous = true;
        warnings.push(format!(
            "\".{}\" files can contain executable content, only accept from senders you trust",
            ext
        ));
    }

    Ok(CheckedName {
        name,
        dangerous,
        warnings,
    })
}

/// Normalize and vet a MIME type.
pub fn check_mime(raw: &str) -> Result<CheckedMime, ValidateError> {
    if raw.is_empty() {
        return Err(ValidateError::EmptyMime);
    }

    let mime = truncate_bytes(raw, MAX_MIME_LEN).to_ascii_lowercase();
    let dangerous = SUSPICIOUS_MIME.iter().any(|s| mime.contains(s));

    Ok(CheckedMime { mime, dangerous })
}

/// Vet a file size.
pub fn check_size(size: u64) -> Result<u64, ValidateError> {
    if size == 0 {
        return Err(ValidateError::ZeroSize);
    }
    if size > MAX_FILE_SIZE {
        return Err(ValidateError::TooLarge);
    }
    Ok(size)
}

/// Check the canonical 36-character session id shape.
pub fn is_session_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// Endpoint ids just have to be non-empty; they are opaque.
pub fn check_peer_id(s: &str) -> Result<&str, ValidateError> {
    if s.is_empty() {
        return Err(ValidateError::EmptyPeerId);
    }
    Ok(s)
}

/// Find the extension that makes this name dangerous, if any.
///
/// Catches both `setup.exe` and the double-extension trick
/// `report.exe.txt`, where a benign final segment masks a blocked one.
fn dangerous_extension(name: &str) -> Option<String> {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return None;
    }

    let last = segments[segments.len() - 1].to_ascii_lowercase();
    if BLOCKED_EXTENSIONS.contains(&last.as_str()) {
        return Some(last);
    }

    if segments.len() >= 3 {
        let second = segments[segments.len() - 2].to_ascii_lowercase();
        if BLOCKED_EXTENSIONS.contains(&second.as_str()) {
            return Some(second);
        }
    }

    None
}

/// Cut a string to at most `max` bytes on a char boundary
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
