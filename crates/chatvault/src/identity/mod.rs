//! Content-derived conversation identity.
//!
//! The id depends only on the platform and the canonical message sequence,
//! so importing the same export twice resolves to the same index row and the
//! same archive files.

use sha2::{Digest, Sha256};

use crate::models::{CanonicalMessage, Platform};

pub const ID_HEX_CHARS: usize = 12;

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

#[must_use]
pub fn conversation_id(platform: Platform, messages: &[CanonicalMessage]) -> String {
    let digest = content_digest(platform, messages);
    digest[..ID_HEX_CHARS].to_string()
}

/// Full SHA-256 hex digest behind [`conversation_id`].
#[must_use]
pub fn content_digest(platform: Platform, messages: &[CanonicalMessage]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_str().as_bytes());
    hasher.update([RECORD_SEPARATOR]);
    for message in messages {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(message.content.as_bytes());
        hasher.update([RECORD_SEPARATOR]);
    }
    format!("{:x}", hasher.finalize())
}
