use serde::{Deserialize, Serialize};
use std::fmt;

/// Content hash of a strategy configuration (BLAKE3 hex of its canonical JSON).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines and table rows.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_hash_deterministic() {
        assert_eq!(ConfigHash::from_bytes(b"abc"), ConfigHash::from_bytes(b"abc"));
        assert_ne!(ConfigHash::from_bytes(b"abc"), ConfigHash::from_bytes(b"abd"));
    }

    #[test]
    fn short_form_is_prefix() {
        let h = ConfigHash::from_bytes(b"abc");
        assert_eq!(h.short().len(), 12);
        assert!(h.0.starts_with(h.short()));
    }
}
