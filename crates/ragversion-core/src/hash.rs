//! Content hashing.
//!
//! Documents and chunks are identified across versions by a hex digest of
//! their text. The same algorithm must be used for a document and its chunks.

use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(Error::Configuration(format!(
                "unsupported hash algorithm '{}' (expected sha256 or sha512)",
                other
            ))),
        }
    }

    /// Lowercase hex digest of `text`.
    pub fn hash(&self, text: &str) -> String {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(text.as_bytes());
                format!("{:x}", hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(text.as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_digest() {
        assert_eq!(
            HashAlgorithm::Sha256.hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha512_length() {
        assert_eq!(HashAlgorithm::Sha512.hash("hello").len(), 128);
    }

    #[test]
    fn test_parse() {
        assert_eq!(HashAlgorithm::parse("SHA256").unwrap(), HashAlgorithm::Sha256);
        assert!(HashAlgorithm::parse("md5").is_err());
    }
}
