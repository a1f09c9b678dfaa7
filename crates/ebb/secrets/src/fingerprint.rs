//! Non-reversible fingerprints of secret values

use ebb_cloud::SecretValue;
use ebb_types::Fingerprint;
use sha2::{Digest, Sha256};

/// SHA-256 of a raw token, hex encoded
pub fn fingerprint_str(value: &str) -> Fingerprint {
    Fingerprint::from_hex(hex::encode(Sha256::digest(value.as_bytes())))
}

pub fn fingerprint(value: &SecretValue) -> Fingerprint {
    fingerprint_str(value.expose())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let a = fingerprint(&SecretValue::new("abc"));
        assert_eq!(
            a.as_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(a, fingerprint_str("abc"));
        assert!(!a.as_hex().contains("abc"));
    }
}
