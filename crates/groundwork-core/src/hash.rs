//! Content hasher.
//!
//! SHA-256 digests rendered as lowercase hex. Used for source file hashes,
//! chunk hashes, document IDs, and the chunking config fingerprint.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Length in hex characters of a full digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hash raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash everything `reader` yields without buffering it whole.
pub fn hash_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash UTF-8 text.
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Stable document ID for a source path: `doc_` + 16 hex chars of its hash.
///
/// Depends only on the path, so edits to the file keep the same ID.
pub fn doc_id_for_path(source_path: &str) -> String {
    let digest = hash_text(source_path);
    format!("doc_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_text("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_length() {
        assert_eq!(hash_bytes(b"").len(), DIGEST_HEX_LEN);
        assert_eq!(hash_bytes(&[0u8; 4096]).len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_one_byte_change_changes_digest() {
        assert_ne!(hash_bytes(b"hello world"), hash_bytes(b"hello worle"));
    }

    #[test]
    fn test_streamed_digest_matches_in_memory() {
        let data = vec![7u8; 200_000];
        assert_eq!(hash_reader(&data[..]).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_doc_id_stable_and_distinct() {
        let a = doc_id_for_path("guides/setup.md");
        assert_eq!(a, doc_id_for_path("guides/setup.md"));
        assert_ne!(a, doc_id_for_path("guides/setup.txt"));
        assert!(a.starts_with("doc_"));
        assert_eq!(a.len(), 20);
    }
}
