//! zstd compression for stored content.

use ragversion_core::error::StorageResultExt;
use ragversion_core::{Error, Result};

const LEVEL: i32 = 3;

/// Encode `text` for storage, returning the bytes and whether they are compressed.
pub fn encode(text: &str, compress: bool) -> Result<(Vec<u8>, bool)> {
    if !compress {
        return Ok((text.as_bytes().to_vec(), false));
    }
    let bytes = zstd::encode_all(text.as_bytes(), LEVEL).storage_context("failed to compress content")?;
    Ok((bytes, true))
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8], compressed: bool) -> Result<String> {
    let raw = if compressed {
        zstd::decode_all(bytes).storage_context("failed to decompress content")?
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw).map_err(|e| Error::storage("stored content is not valid UTF-8", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_content_restores() {
        let text = "repeated line\n".repeat(200);
        let (bytes, compressed) = encode(&text, true).unwrap();
        assert!(compressed);
        assert!(bytes.len() < text.len());
        assert_eq!(decode(&bytes, true).unwrap(), text);
    }

    #[test]
    fn test_plain_passthrough() {
        let (bytes, compressed) = encode("héllo", false).unwrap();
        assert!(!compressed);
        assert_eq!(bytes, "héllo".as_bytes());
        assert_eq!(decode(&bytes, false).unwrap(), "héllo");
    }

    #[test]
    fn test_corrupt_data_is_storage_error() {
        let err = decode(b"not zstd", true).unwrap_err();
        assert_eq!(err.category().as_str(), "storage");
    }
}
