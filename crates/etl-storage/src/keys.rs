//! Key encoding and decoding for storage layer.
//!
//! - checkpoint records: `checkpoint:{name}`
//! - pending set members: `pending:{set}:{member}`
//!
//! Set names must not contain `:`; members may contain anything.

use crate::error::StorageError;

/// Key for checkpoint entries
/// Format: checkpoint:{name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Logical record name (e.g., "etl_state")
    pub name: String,
}

impl CheckpointKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.name).into_bytes()
    }
}

/// Key for one member of a pending-id set
/// Format: pending:{set}:{member}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKey {
    pub set: String,
    pub member: String,
}

impl PendingKey {
    pub fn new(set: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            member: member.into(),
        }
    }

    /// Prefix shared by every member of a set.
    pub fn set_prefix(set: &str) -> Vec<u8> {
        format!("pending:{}:", set).into_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("pending:{}:{}", self.set, self.member).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("pending"), Some(set), Some(member)) => Ok(Self::new(set, member)),
            _ => Err(StorageError::Key(format!("Invalid pending key format: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key_format() {
        let key = CheckpointKey::new("etl_state");
        assert_eq!(key.to_bytes(), b"checkpoint:etl_state".to_vec());
    }

    #[test]
    fn test_pending_key_roundtrip_with_colons_in_member() {
        let key = PendingKey::new("movie_ids", "urn:film:42");
        let decoded = PendingKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_pending_key_shares_set_prefix() {
        let key = PendingKey::new("movie_ids", "abc");
        assert!(key.to_bytes().starts_with(&PendingKey::set_prefix("movie_ids")));
        assert!(!key.to_bytes().starts_with(&PendingKey::set_prefix("movie")));
    }

    #[test]
    fn test_invalid_pending_key() {
        assert!(PendingKey::from_bytes(b"checkpoint:etl_state").is_err());
        assert!(PendingKey::from_bytes(b"pending:only_set").is_err());
    }
}
