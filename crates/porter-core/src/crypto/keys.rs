//! secp256k1 keys with x-only public keys and BIP-340 Schnorr signatures.

use std::fmt;
use std::str::FromStr;

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::CryptoError;

/// X-only public key (32 bytes), rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = hex::decode(s)
            .map_err(|_| CryptoError::InvalidPublicKey)?
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a BIP-340 signature over `message` (the raw 32-byte event id).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::try_from(signature).map_err(|_| CryptoError::InvalidSignature)?;
        key.verify_raw(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    /// The full curve point with even y, as BIP-340 lifts x-only keys.
    pub(crate) fn to_curve_point(self) -> Result<k256::PublicKey, CryptoError> {
        let mut sec1 = [0u8; 33];
        sec1[0] = 0x02;
        sec1[1..].copy_from_slice(&self.0);
        k256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A keypair held by this process.
///
/// The secret is kept as given: `SigningKey` normalises it to an even-y
/// point internally, which would change the hex on a round trip.
#[derive(Clone)]
pub struct Keys {
    secret: [u8; 32],
    signing: SigningKey,
}

impl Keys {
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        Self {
            secret: signing.to_bytes().into(),
            signing,
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_bytes(&secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { secret, signing })
    }

    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = hex::decode(s.trim())
            .map_err(|_| CryptoError::InvalidSecretKey)?
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Self::from_secret_bytes(bytes)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes().into())
    }

    /// BIP-340 signature over a 32-byte digest.
    ///
    /// Auxiliary randomness is all zeros, so the same digest always yields the
    /// same signature.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 64], CryptoError> {
        let sig = self
            .signing
            .sign_raw(digest, &[0u8; 32])
            .map_err(|_| CryptoError::SigningFailed)?;
        Ok(sig.to_bytes())
    }

    /// x-coordinate of the ECDH shared point with `peer`.
    pub fn shared_x(&self, peer: &PublicKey) -> Result<[u8; 32], CryptoError> {
        let point = peer.to_curve_point()?;
        let shared =
            k256::ecdh::diffie_hellman(self.signing.as_nonzero_scalar(), point.as_affine());
        Ok((*shared.raw_secret_bytes()).into())
    }
}

impl PartialEq for Keys {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Serialize for Keys {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.secret_hex())
    }
}

impl<'de> Deserialize<'de> for Keys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_secret_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(n: u8) -> [u8; 32] {
        let mut s = [0u8; 32];
        s[31] = n;
        s
    }

    #[test]
    fn secret_hex_round_trips_exactly() {
        for _ in 0..8 {
            let keys = Keys::generate();
            let back = Keys::from_secret_hex(&keys.secret_hex()).unwrap();
            assert_eq!(back.secret_hex(), keys.secret_hex());
            assert_eq!(back.public_key(), keys.public_key());
        }
    }

    #[test]
    fn generator_public_key() {
        // secret 1 -> x-coordinate of G
        let keys = Keys::from_secret_bytes(secret(1)).unwrap();
        assert_eq!(
            keys.public_key().to_hex(),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn sign_verify_and_determinism() {
        let keys = Keys::generate();
        let digest = [7u8; 32];
        let sig1 = keys.sign_digest(&digest).unwrap();
        let sig2 = keys.sign_digest(&digest).unwrap();
        assert_eq!(sig1, sig2);

        keys.public_key().verify(&digest, &sig1).unwrap();

        let mut other = digest;
        other[0] ^= 1;
        assert_eq!(
            keys.public_key().verify(&other, &sig1),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = Keys::generate();
        let b = Keys::generate();
        assert_eq!(
            a.shared_x(&b.public_key()).unwrap(),
            b.shared_x(&a.public_key()).unwrap()
        );
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Keys::from_secret_hex("zz").is_err());
        assert!(PublicKey::from_hex("00").is_err());
        assert!(Keys::from_secret_bytes([0u8; 32]).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keys = Keys::generate();
        assert!(!format!("{keys:?}").contains(&keys.secret_hex()));
    }
}
