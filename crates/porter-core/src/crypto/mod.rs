//! Crypto primitives: secp256k1 Schnorr keys and NIP-44 v2 payload encryption.

pub mod keys;
pub mod nip44;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use keys::{Keys, PublicKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("signing failed")]
    SigningFailed,

    #[error("plaintext length {0} out of range")]
    PlaintextLength(usize),

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    #[error("invalid MAC")]
    InvalidMac,
}

/// SHA-256 digest.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// SHA-256 digest as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
