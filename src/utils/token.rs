//! One-time secrets (invitation tokens, OTP codes). Only the SHA-256 digest
//! is stored; the raw value leaves the server once.

use rand::{Rng, RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Six digit numeric code, zero padded.
pub fn generate_otp() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape_and_uniqueness() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stored_hash_does_not_contain_token() {
        let raw = generate_token();
        let stored = hash_token(&raw);
        assert_eq!(stored.len(), 64);
        assert_ne!(stored, raw);
        assert!(!stored.contains(&raw));
        assert_eq!(stored, hash_token(&raw));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_otp_is_six_digits() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
