//! Content fingerprints.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded fingerprint (SHA-256, 32 bytes).
pub const FINGERPRINT_LENGTH: usize = 64;

/// Compute the content fingerprint of a byte buffer.
///
/// Lowercase hex-encoded SHA-256. Depends on nothing but the bytes, so the
/// same image downloaded from two different URLs on two different days
/// produces the same fingerprint.
///
/// ```
/// assert_eq!(
///     apod_storage::fingerprint(b"abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
/// );
/// ```
pub fn fingerprint(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"".as_slice(), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")]
    #[case(b"abc".as_slice(), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")]
    fn test_known_digests(#[case] input: &[u8], #[case] expected: &str) {
        assert_eq!(fingerprint(input), expected);
    }

    #[test]
    fn test_fixed_length_lowercase_hex() {
        let fp = fingerprint(b"\x00\xff\x10 not an image");
        assert_eq!(fp.len(), FINGERPRINT_LENGTH);
        assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_deterministic() {
        let data = vec![42u8; 4096];
        assert_eq!(fingerprint(&data), fingerprint(data.clone()));
        assert_ne!(fingerprint(&data), fingerprint(&data[1..]));
    }
}
