//! Checksums.
//!
//! All integrity checks in the system use SHA-256, carried on the wire
//! and in the database as lowercase hexadecimal.

use digest::Output as DigestOutput;
use serde::{de, ser, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HexadError, HexadResult};

/// A SHA-256 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Convenience function to hash a slice.
    pub fn sha256_from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Wraps a finalized SHA-256 digest.
    pub fn from_digest(output: DigestOutput<Sha256>) -> Self {
        Self(output.into())
    }

    /// Parses the lowercase hexadecimal representation.
    pub fn from_hex(s: &str) -> HexadResult<Self> {
        if s.len() != 64 {
            return Err(HexadError::InvalidChecksum {
                value: s.to_owned(),
                reason: "must be 64 hexadecimal characters",
            });
        }

        let mut data = [0u8; 32];
        hex::decode_to_slice(s, &mut data).map_err(|_| HexadError::InvalidChecksum {
            value: s.to_owned(),
            reason: "invalid hexadecimal",
        })?;

        Ok(Self(data))
    }

    /// Returns the canonical wire representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    /// Deserializes a hexadecimal checksum string.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::from_hex(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Serialize for Checksum {
    /// Serializes the checksum into a hexadecimal string.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let checksum = Checksum::sha256_from_bytes(b"hello world");
        assert_eq!(
            checksum.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let checksum = Checksum::sha256_from_bytes(b"");
        let parsed = Checksum::from_hex(&checksum.to_hex()).unwrap();
        assert_eq!(checksum, parsed);
    }

    #[test]
    fn test_rejects_bad_strings() {
        assert!(Checksum::from_hex("deadbeef").is_err());
        assert!(Checksum::from_hex(&"g".repeat(64)).is_err());
    }
}
