//! NIP-44 v2 encryption for remote-signer RPC bodies.
//!
//! ```text
//! conversation_key = HKDF-extract(salt = "nip44-v2", ikm = ecdh_x(a, B))
//! keys             = HKDF-expand(conversation_key, info = nonce, 76)
//!                  = chacha_key(32) | chacha_nonce(12) | hmac_key(32)
//! payload          = base64(0x02 | nonce(32) | chacha20(pad(plaintext)) | hmac(nonce | ciphertext))
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use super::{CryptoError, Keys, PublicKey};

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";
const MIN_PLAINTEXT: usize = 1;
const MAX_PLAINTEXT: usize = 65535;

/// Shared key between `keys` and `peer`. Symmetric: both sides derive the same value.
pub fn conversation_key(keys: &Keys, peer: &PublicKey) -> Result<[u8; 32], CryptoError> {
    let shared_x = keys.shared_x(peer)?;
    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), &shared_x);
    Ok(prk.into())
}

pub fn encrypt(conversation_key: &[u8; 32], plaintext: &str) -> Result<String, CryptoError> {
    let mut nonce = [0u8; 32];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(conversation_key, plaintext, &nonce)
}

pub fn encrypt_with_nonce(
    conversation_key: &[u8; 32],
    plaintext: &str,
    nonce: &[u8; 32],
) -> Result<String, CryptoError> {
    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, nonce)?;

    let mut buf = pad(plaintext.as_bytes())?;
    let mut cipher = ChaCha20::new_from_slices(&chacha_key, &chacha_nonce)
        .map_err(|_| CryptoError::MalformedPayload("cipher init"))?;
    cipher.apply_keystream(&mut buf);

    let mac = hmac_aad(&hmac_key, nonce, &buf)?;

    let mut out = Vec::with_capacity(1 + 32 + buf.len() + 32);
    out.push(VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(&buf);
    out.extend_from_slice(&mac);
    Ok(STANDARD.encode(out))
}

pub fn decrypt(conversation_key: &[u8; 32], payload: &str) -> Result<String, CryptoError> {
    if payload.starts_with('#') {
        return Err(CryptoError::UnsupportedVersion(0));
    }
    let raw = STANDARD
        .decode(payload)
        .map_err(|_| CryptoError::MalformedPayload("base64"))?;
    // version + nonce + at least one padded block + mac
    if raw.len() < 1 + 32 + 2 + 32 + 32 {
        return Err(CryptoError::MalformedPayload("too short"));
    }
    if raw[0] != VERSION {
        return Err(CryptoError::UnsupportedVersion(raw[0]));
    }

    let nonce: [u8; 32] = raw[1..33]
        .try_into()
        .map_err(|_| CryptoError::MalformedPayload("nonce"))?;
    let mac_start = raw.len() - 32;
    let ciphertext = &raw[33..mac_start];
    let mac = &raw[mac_start..];

    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, &nonce)?;

    let mut verifier = Hmac::<Sha256>::new_from_slice(&hmac_key)
        .map_err(|_| CryptoError::MalformedPayload("hmac key"))?;
    verifier.update(&nonce);
    verifier.update(ciphertext);
    verifier.verify_slice(mac).map_err(|_| CryptoError::InvalidMac)?;

    let mut buf = ciphertext.to_vec();
    let mut cipher = ChaCha20::new_from_slices(&chacha_key, &chacha_nonce)
        .map_err(|_| CryptoError::MalformedPayload("cipher init"))?;
    cipher.apply_keystream(&mut buf);

    unpad(&buf)
}

/// Padded length for a plaintext of `len` bytes (excluding the 2-byte prefix).
pub fn padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn message_keys(
    conversation_key: &[u8; 32],
    nonce: &[u8; 32],
) -> Result<([u8; 32], [u8; 12], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(conversation_key)
        .map_err(|_| CryptoError::MalformedPayload("conversation key"))?;
    let mut okm = [0u8; 76];
    hk.expand(nonce, &mut okm)
        .map_err(|_| CryptoError::MalformedPayload("hkdf expand"))?;

    let mut chacha_key = [0u8; 32];
    let mut chacha_nonce = [0u8; 12];
    let mut hmac_key = [0u8; 32];
    chacha_key.copy_from_slice(&okm[0..32]);
    chacha_nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);
    Ok((chacha_key, chacha_nonce, hmac_key))
}

fn hmac_aad(key: &[u8; 32], nonce: &[u8; 32], ciphertext: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| CryptoError::MalformedPayload("hmac key"))?;
    mac.update(nonce);
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().into())
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT..=MAX_PLAINTEXT).contains(&len) {
        return Err(CryptoError::PlaintextLength(len));
    }
    let mut out = Vec::with_capacity(2 + padded_len(len));
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(2 + padded_len(len), 0);
    Ok(out)
}

fn unpad(padded: &[u8]) -> Result<String, CryptoError> {
    if padded.len() < 2 {
        return Err(CryptoError::MalformedPayload("padding"));
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT || padded.len() != 2 + padded_len(len) {
        return Err(CryptoError::MalformedPayload("padding"));
    }
    String::from_utf8(padded[2..2 + len].to_vec())
        .map_err(|_| CryptoError::MalformedPayload("utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(n: u8) -> Keys {
        let mut s = [0u8; 32];
        s[31] = n;
        Keys::from_secret_bytes(s).unwrap()
    }

    #[rstest]
    #[case(1, 32)]
    #[case(16, 32)]
    #[case(32, 32)]
    #[case(33, 64)]
    #[case(37, 64)]
    #[case(64, 64)]
    #[case(65, 96)]
    #[case(100, 128)]
    #[case(200, 224)]
    #[case(250, 256)]
    #[case(320, 320)]
    #[case(383, 384)]
    #[case(384, 384)]
    #[case(400, 448)]
    #[case(500, 512)]
    #[case(515, 640)]
    #[case(700, 768)]
    #[case(900, 1024)]
    #[case(65535, 65536)]
    fn padded_lengths(#[case] len: usize, #[case] expected: usize) {
        assert_eq!(padded_len(len), expected);
    }

    #[test]
    fn conversation_key_known_vector() {
        let ck = conversation_key(&keys(1), &keys(2).public_key()).unwrap();
        assert_eq!(
            hex::encode(ck),
            "c41c775356fd92eadc63ff5a0dc1da211b268cbea22316767095b2871ea1412d"
        );
    }

    #[test]
    fn conversation_key_is_symmetric() {
        let a = Keys::generate();
        let b = Keys::generate();
        assert_eq!(
            conversation_key(&a, &b.public_key()).unwrap(),
            conversation_key(&b, &a.public_key()).unwrap()
        );
    }

    #[test]
    fn decrypts_what_the_peer_encrypted() {
        let a = Keys::generate();
        let b = Keys::generate();
        let ck_a = conversation_key(&a, &b.public_key()).unwrap();
        let ck_b = conversation_key(&b, &a.public_key()).unwrap();

        let msg = r#"{"id":"1","method":"sign_event","params":["{}"]}"#;
        let payload = encrypt(&ck_a, msg).unwrap();
        assert_eq!(decrypt(&ck_b, &payload).unwrap(), msg);
    }

    #[test]
    fn tampered_payload_fails_mac() {
        let ck = [9u8; 32];
        let payload = encrypt_with_nonce(&ck, "hello", &[1u8; 32]).unwrap();
        let mut raw = STANDARD.decode(&payload).unwrap();
        raw[40] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert_eq!(decrypt(&ck, &tampered), Err(CryptoError::InvalidMac));
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        assert_eq!(
            encrypt(&[0u8; 32], ""),
            Err(CryptoError::PlaintextLength(0))
        );
    }

    #[test]
    fn wrong_version_is_rejected() {
        let ck = [3u8; 32];
        let payload = encrypt_with_nonce(&ck, "x", &[0u8; 32]).unwrap();
        let mut raw = STANDARD.decode(&payload).unwrap();
        raw[0] = 1;
        assert_eq!(
            decrypt(&ck, &STANDARD.encode(raw)),
            Err(CryptoError::UnsupportedVersion(1))
        );
    }
}
