//! SHA-256 over complete asset content.

use sha2::{Digest, Sha256};

/// Digest of the full, unsplit buffer. Sent with the commit so the store can
/// verify the reassembled content regardless of chunking.
pub fn digest(content: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}

pub fn digest_hex(digest: &[u8; 32]) -> String {
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let content = vec![7u8; 4096];
        assert_eq!(digest(&content), digest(&content));
    }

    #[test]
    fn digest_of_empty_input_is_the_known_value() {
        assert_eq!(
            digest_hex(&digest(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_differs_for_different_content() {
        assert_ne!(digest(b"abc"), digest(b"abd"));
    }
}
