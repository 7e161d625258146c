use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use scrypt::Params;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Result, StoreError};

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const SALT_LEN: usize = 16;
pub(crate) const NONCE_LEN: usize = 12;

// scrypt cost parameters; they are part of the on-disk format, so changing
// them orphans every store created before the change.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// A 32-byte symmetric key.
///
/// The backing bytes are wiped when the value is dropped or replaced. The
/// type is never serialized and never leaves this crate; callers interact
/// with it only through `seal`/`open`.
pub(crate) struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    /// SHA-256 digest of the raw key, stored on disk as the password
    /// verifier.
    pub(crate) fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Fills `buf` from the operating system CSPRNG.
///
/// # Errors
/// Returns `StoreError::Crypto` if the system random source fails.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| StoreError::Crypto(format!("random source failed: {e}")))
}

/// Derives the store key from a password and salt via scrypt
/// (N=2^15, r=8, p=1, dkLen=32).
///
/// The derivation is deterministic for a given password/salt pair; the
/// same parameters are used on every open so keys derived at `set_password`
/// time and at `unlock` time are identical.
///
/// # Errors
/// Returns `StoreError::Crypto` if the parameters are rejected or the
/// derivation itself fails.
pub(crate) fn derive_key(password: &str, salt: &[u8]) -> Result<KeyMaterial> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| StoreError::Crypto(format!("invalid KDF parameters: {e}")))?;
    let mut out = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut out)
        .map_err(|e| StoreError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(KeyMaterial(out))
}

/// Encrypts `plaintext` with AES-256-GCM under a fresh random 12-byte
/// nonce and returns `nonce || ciphertext`.
///
/// The nonce is generated per call; it is never reused under the same key.
///
/// # Errors
/// Returns `StoreError::Crypto` if cipher construction, nonce generation
/// or sealing fails.
pub(crate) fn seal(key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| StoreError::Crypto("cipher construction failed".into()))?;
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StoreError::Crypto("encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext` blob produced by [`seal`].
///
/// # Errors
/// Returns `StoreError::Crypto` if the blob is shorter than a nonce, the
/// authentication tag does not verify, or the cipher cannot be built.
pub(crate) fn open(key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(StoreError::Crypto("ciphertext too short".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| StoreError::Crypto("cipher construction failed".into()))?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::Crypto("decryption failed".into()))
}

/// Constant-time equality for digests. Differing lengths compare unequal.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> KeyMaterial {
        KeyMaterial([byte; KEY_LEN])
    }

    #[test]
    fn test_derive_key_deterministic_and_salt_sensitive() {
        let salt_a = [1u8; SALT_LEN];
        let salt_b = [2u8; SALT_LEN];

        let a = derive_key("correct horse battery staple", &salt_a).unwrap();
        let b = derive_key("correct horse battery staple", &salt_a).unwrap();
        let c = derive_key("correct horse battery staple", &salt_b).unwrap();
        let d = derive_key("other password entirely", &salt_a).unwrap();

        assert_eq!(a.0, b.0);
        assert_ne!(a.0, c.0);
        assert_ne!(a.0, d.0);
    }

    #[test]
    fn test_seal_open_roundtrip_various_sizes() {
        let key = test_key(0x42);
        for plaintext in [&b""[..], &b"x"[..], &vec![7u8; 64 * 1024][..]] {
            let sealed = seal(&key, plaintext).unwrap();
            assert!(sealed.len() >= NONCE_LEN + plaintext.len());
            let opened = open(&key, &sealed).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let key = test_key(0x01);
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..64 {
            let sealed = seal(&key, b"same plaintext").unwrap();
            assert!(nonces.insert(sealed[..NONCE_LEN].to_vec()), "nonce reused");
        }
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = seal(&test_key(0x10), b"payload").unwrap();
        assert!(open(&test_key(0x11), &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_tampered_ciphertext() {
        let key = test_key(0x33);
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_truncated_blob() {
        let key = test_key(0x33);
        let err = open(&key, &[0u8; NONCE_LEN - 1]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = test_key(0x55);
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_ne!(key.fingerprint(), test_key(0x56).fingerprint());
    }
}
