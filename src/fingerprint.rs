use md5::Md5;
use sha2::{Digest, Sha256};

/// Strong content hash used as the durable identity of a version's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fast 128-bit checksum used only to short-circuit identical-content
/// comparisons. Advisory: the content hash stays authoritative.
pub fn checksum(text: &str) -> String {
    format!("{:x}", Md5::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_checksum_are_deterministic() {
        let samples = ["", "hello world", "line one\nline two\n", "héllo ünïcode"];
        for text in samples {
            assert_eq!(content_hash(text), content_hash(text));
            assert_eq!(checksum(text), checksum(text));
        }
    }

    #[test]
    fn different_content_produces_different_digests() {
        assert_ne!(content_hash("alpha"), content_hash("beta"));
        assert_ne!(checksum("alpha"), checksum("beta"));
    }

    #[test]
    fn digests_are_hex_of_expected_width() {
        assert_eq!(content_hash("x").len(), 64);
        assert_eq!(checksum("x").len(), 32);
    }
}
