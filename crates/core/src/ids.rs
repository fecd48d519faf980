#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn new(value: u64) -> Result<Self, OwnerIdError> {
        if value == 0 {
            return Err(OwnerIdError::Zero);
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn parse(value: &str) -> Result<Self, OwnerIdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(OwnerIdError::Empty);
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OwnerIdError::NotNumeric);
        }
        let parsed = trimmed.parse::<u64>().map_err(|_| OwnerIdError::TooLarge)?;
        Self::new(parsed)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OwnerIdError {
    #[error("owner id must not be empty")]
    Empty,
    #[error("owner id must be a decimal number")]
    NotNumeric,
    #[error("owner id is too large")]
    TooLarge,
    #[error("owner id must be positive")]
    Zero,
}

/// Parses a comma-separated id list. Blank segments are skipped; any other
/// malformed segment fails the whole list.
pub fn parse_owner_csv(raw: &str) -> Result<Vec<OwnerId>, OwnerIdError> {
    let mut out = Vec::new();
    for segment in raw.split(',') {
        if segment.trim().is_empty() {
            continue;
        }
        out.push(OwnerId::parse(segment)?);
    }
    Ok(out)
}

const NODE_ID_BYTES: usize = 16;

/// Content-addressed node id: truncated SHA-256 of the canonical path encoding.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn from_digest_input(input: &[u8]) -> Self {
        let digest = Sha256::digest(input);
        let mut out = String::with_capacity(NODE_ID_BYTES * 2);
        for b in &digest[..NODE_ID_BYTES] {
            let _ = write!(&mut out, "{b:02x}");
        }
        Self(out)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.len() != NODE_ID_BYTES * 2 {
            return None;
        }
        if !trimmed.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_id_parsing() {
        assert_eq!(OwnerId::parse("").unwrap_err(), OwnerIdError::Empty);
        assert_eq!(OwnerId::parse("  ").unwrap_err(), OwnerIdError::Empty);
        assert_eq!(OwnerId::parse("-4").unwrap_err(), OwnerIdError::NotNumeric);
        assert_eq!(OwnerId::parse("0").unwrap_err(), OwnerIdError::Zero);
        assert_eq!(
            OwnerId::parse("99999999999999999999999").unwrap_err(),
            OwnerIdError::TooLarge
        );
        assert_eq!(OwnerId::parse(" 42 ").unwrap().get(), 42);
    }

    #[test]
    fn owner_csv_skips_blank_segments() {
        let ids = parse_owner_csv("3, ,7,,3").unwrap();
        assert_eq!(
            ids.iter().map(|id| id.get()).collect::<Vec<_>>(),
            vec![3, 7, 3]
        );
        assert!(parse_owner_csv("3,x").is_err());
        assert!(parse_owner_csv("").unwrap().is_empty());
    }

    #[test]
    fn node_id_is_stable_hex() {
        let a = NodeId::from_digest_input(b"kingdom=Animalia");
        let b = NodeId::from_digest_input(b"kingdom=Animalia");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(NodeId::parse(a.as_str()), Some(a.clone()));
        assert_eq!(NodeId::parse("XYZ"), None);
        assert_ne!(a, NodeId::from_digest_input(b"kingdom=Plantae"));
    }
}
