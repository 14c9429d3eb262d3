//! SHA-256 content addressing and fixed-size chunk splitting.
//!
//! Grounded on the teacher's `storage/cas.rs` hash-wrapper shape, but hashing with
//! `sha2` (already a teacher client dependency) instead of BLAKE3, and splitting into
//! fixed-size windows instead of content-defined (FastCDC) boundaries, so two
//! independent producers of the same bytes always derive the same chunk boundaries.

use sha2::{Digest, Sha256};

/// Chunking threshold: payloads at or under this size are stored as a single chunk
/// (and a file wrapping exactly one chunk is a candidate for the inline-file
/// optimization, which the buffered writer and commit admitter apply).
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// The canonical key of the empty byte string, `sha256:e3b0c4...`.
pub const EMPTY_CHUNK_KEY: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Computes the canonical `sha256:<lowercase-hex>` key for a byte slice.
pub fn compute_key(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("sha256:{}", hex::encode(digest))
}

/// Whether a payload of this size must be split into more than one chunk under the
/// default node limit.
pub fn needs_chunking(size: usize) -> bool {
    needs_chunking_with_limit(size, CHUNK_SIZE)
}

/// Whether a payload of this size must be split under an explicit node limit — tickets
/// carry their own immutable `nodeLimit`, so callers chunking against a ticket's config
/// use this instead of the process-wide default.
pub fn needs_chunking_with_limit(size: usize, node_limit: usize) -> bool {
    size > node_limit
}

/// Splits a payload into fixed-size chunks under the default node limit, the final chunk
/// possibly shorter. Returns a single (possibly empty) chunk for an empty payload.
pub fn split_into_chunks(bytes: &[u8]) -> Vec<&[u8]> {
    split_into_chunks_with_limit(bytes, CHUNK_SIZE)
}

/// Splits a payload into fixed-size chunks under an explicit node limit.
pub fn split_into_chunks_with_limit(bytes: &[u8], node_limit: usize) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return vec![&bytes[0..0]];
    }
    bytes.chunks(node_limit).collect()
}

/// Validates that `key` has the `sha256:<64 lowercase hex>` shape without hashing.
pub fn is_well_formed_key(key: &str) -> bool {
    match key.strip_prefix("sha256:") {
        Some(hex_part) => {
            hex_part.len() == 64
                && hex_part
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_hash_to_the_well_known_empty_key() {
        assert_eq!(compute_key(b""), EMPTY_CHUNK_KEY);
    }

    #[test]
    fn key_is_deterministic() {
        let data = b"the quick brown fox";
        assert_eq!(compute_key(data), compute_key(data));
    }

    #[test]
    fn small_payload_does_not_need_chunking() {
        assert!(!needs_chunking(CHUNK_SIZE));
        assert!(needs_chunking(CHUNK_SIZE + 1));
    }

    #[test]
    fn split_produces_bounded_windows_with_a_short_tail() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 17];
        let chunks = split_into_chunks(&data);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 17);
    }

    #[test]
    fn split_of_empty_payload_is_one_empty_chunk() {
        let chunks = split_into_chunks(b"");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn split_with_explicit_limit_honors_a_ticket_node_limit() {
        let chunks = split_into_chunks_with_limit(&[7u8; 2500], 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn needs_chunking_with_limit_is_strict() {
        assert!(!needs_chunking_with_limit(1000, 1000));
        assert!(needs_chunking_with_limit(1001, 1000));
    }

    #[test]
    fn well_formed_key_check() {
        assert!(is_well_formed_key(EMPTY_CHUNK_KEY));
        assert!(!is_well_formed_key("sha256:not-hex"));
        assert!(!is_well_formed_key("md5:abc"));
        assert!(!is_well_formed_key("sha256:ABCDEF"));
    }
}
