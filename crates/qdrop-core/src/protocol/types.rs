//! Core identifier and session data types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_PARTICIPANTS, SHARE_CODE_ALPHABET, SHARE_CODE_LEN};
use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque identifier for a sharing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("failed to generate random session ID");
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes as hex for brevity
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Opaque identifier for a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub [u8; 16]);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("failed to generate random file ID");
        Self(bytes)
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Server-assigned identifier for one network connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// =============================================================================
// Share Code
// =============================================================================

/// 6-character human-typable session code, uppercase alphanumeric.
///
/// Unique only among *active* sessions; codes may be reused after expiry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareCode([u8; SHARE_CODE_LEN]);

impl ShareCode {
    /// Generate a random share code.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut code = [0u8; SHARE_CODE_LEN];
        for slot in code.iter_mut() {
            *slot = SHARE_CODE_ALPHABET[rng.gen_range(0..SHARE_CODE_ALPHABET.len())];
        }
        Self(code)
    }

    /// Parse a user-entered code, normalizing lowercase input.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() != SHARE_CODE_LEN {
            return Err(Error::Protocol {
                message: format!("share code must be {SHARE_CODE_LEN} characters"),
            });
        }
        let mut code = [0u8; SHARE_CODE_LEN];
        for (slot, ch) in code.iter_mut().zip(trimmed.chars()) {
            let upper = ch.to_ascii_uppercase();
            if !upper.is_ascii_uppercase() && !upper.is_ascii_digit() {
                return Err(Error::Protocol {
                    message: format!("invalid share code character: {ch:?}"),
                });
            }
            *slot = upper as u8;
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only ASCII alphanumerics are ever stored.
        std::str::from_utf8(&self.0).expect("share code is always ASCII")
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareCode({})", self.as_str())
    }
}

// =============================================================================
// Roles and Participants
// =============================================================================

/// Membership role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The session owner; exactly one per session.
    Creator,
    /// Any other member.
    Participant,
}

/// Per-member bookkeeping, keyed by [`ConnectionId`] in the session.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub joined_at: SystemTime,
}

/// Session-level settings fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Capacity including the creator.
    pub max_participants: usize,
    /// Whether participants may download via the relay.
    pub allow_download: bool,
    /// Whether the TTL sweep may retire this session.
    pub auto_expire: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            allow_download: true,
            auto_expire: true,
        }
    }
}

/// How file bytes move for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Frames routed through the server relay.
    #[default]
    Relayed,
    /// Direct channel negotiated via the signaling relay.
    PeerToPeer,
}

// =============================================================================
// File Records
// =============================================================================

/// An uploaded file owned by a session.
///
/// Immutable after registration except for the download counter; removed only
/// together with the whole session.
#[derive(Debug)]
pub struct FileRecord {
    pub id: FileId,
    pub original_name: String,
    pub stored_key: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: SystemTime,
    pub uploaded_by: String,
    download_count: AtomicU64,
}

impl FileRecord {
    pub fn new(
        original_name: String,
        stored_key: String,
        size: u64,
        mime_type: String,
        uploaded_by: String,
    ) -> Self {
        Self {
            id: FileId::new(),
            original_name,
            stored_key,
            size,
            mime_type,
            uploaded_at: SystemTime::now(),
            uploaded_by,
            download_count: AtomicU64::new(0),
        }
    }

    /// Record one completed download. Safe under concurrent downloads.
    pub fn record_download(&self) -> u64 {
        self.download_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn download_count(&self) -> u64 {
        self.download_count.load(Ordering::Relaxed)
    }

    /// Wire projection for file-list notifications.
    pub fn to_entry(&self) -> FileEntry {
        FileEntry {
            id: self.id,
            name: self.original_name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            uploaded_at: self
                .uploaded_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Entry in a file-list update notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Unix timestamp, seconds.
    pub uploaded_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_code_generate_shape() {
        for _ in 0..64 {
            let code = ShareCode::generate();
            let s = code.as_str();
            assert_eq!(s.len(), SHARE_CODE_LEN);
            assert!(s
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn share_code_parse_normalizes_case() {
        let code = ShareCode::parse("ab12cd").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
        assert_eq!(code, ShareCode::parse(" AB12CD ").unwrap());
    }

    #[test]
    fn share_code_parse_rejects_bad_input() {
        assert!(ShareCode::parse("AB12C").is_err());
        assert!(ShareCode::parse("AB12CDE").is_err());
        assert!(ShareCode::parse("AB12C!").is_err());
        assert!(ShareCode::parse("").is_err());
    }

    #[test]
    fn session_id_display_is_short_hex() {
        let id = SessionId::from_bytes([0xAB; 16]);
        assert_eq!(id.to_string(), "abababababababab");
    }

    #[test]
    fn download_count_increments() {
        let record = FileRecord::new(
            "a.txt".into(),
            "stored-a".into(),
            10,
            "text/plain".into(),
            "user-1".into(),
        );
        assert_eq!(record.download_count(), 0);
        assert_eq!(record.record_download(), 1);
        assert_eq!(record.record_download(), 2);
    }

    #[test]
    fn file_entry_projection() {
        let record = FileRecord::new(
            "b.bin".into(),
            "stored-b".into(),
            42,
            "application/octet-stream".into(),
            "user-2".into(),
        );
        let entry = record.to_entry();
        assert_eq!(entry.id, record.id);
        assert_eq!(entry.name, "b.bin");
        assert_eq!(entry.size, 42);
    }
}
