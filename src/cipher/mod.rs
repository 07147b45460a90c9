//! Authenticated encryption for vault entries.
//!
//! The operator supplies a 64-hex-character secret. It is decoded into a
//! 32-byte AES-256-GCM key; the key's canonical form is URL-safe base64.
//!
//! # Envelope
//!
//! ```text
//! version (1) | issued_at (8, big-endian unix seconds) | nonce (12) | ciphertext + tag
//! ```
//!
//! The whole envelope is URL-safe base64 encoded. Version and timestamp are
//! bound as associated data, so any modification of the header, nonce or
//! ciphertext fails the integrity check.

use crate::error::{CipherError, KeyFormatError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use chrono::Utc;
use rand::RngCore;
use std::fmt;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

const VERSION: u8 = 0x01;
const HEADER_SIZE: usize = 1 + 8;

/// Tolerated clock skew when checking envelope age
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// A 32-byte key derived from the operator secret.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// URL-safe base64 form of the key.
    pub fn encoded(&self) -> String {
        BASE64_URL.encode(self.0)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Turn a 64-hex-character secret into the encryption key.
///
/// Deterministic: the same secret always yields the same key.
pub fn derive_key(secret: &str) -> Result<DerivedKey, KeyFormatError> {
    let found = secret.chars().count();
    if found != KEY_SIZE * 2 {
        return Err(KeyFormatError::WrongLength { found });
    }

    // Right length in characters; multibyte characters fail here as non-hex
    let bytes = hex::decode(secret).map_err(|_| KeyFormatError::NonHex)?;
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(DerivedKey(key))
}

/// Encrypts and decrypts opaque payloads with one key.
#[derive(Clone)]
pub struct CipherCodec {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherCodec(<redacted>)")
    }
}

impl CipherCodec {
    pub fn new(key: &DerivedKey) -> Self {
        let key: [u8; KEY_SIZE] = *key.as_bytes();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Derive the key from a 64-hex secret and build the codec.
    pub fn from_secret(secret: &str) -> Result<Self, KeyFormatError> {
        Ok(Self::new(&derive_key(secret)?))
    }

    /// Generate a fresh random 64-hex secret suitable for [`CipherCodec::from_secret`].
    pub fn generate_secret() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }

    /// Seal `plaintext` into a URL-safe envelope with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.encrypt_at(plaintext, Utc::now().timestamp())
    }

    fn encrypt_at(&self, plaintext: &[u8], issued_at: i64) -> Result<Vec<u8>, CipherError> {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = VERSION;
        header[1..].copy_from_slice(&issued_at.to_be_bytes());

        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| CipherError::Encryption)?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + sealed.len());
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);

        Ok(BASE64_URL.encode(envelope).into_bytes())
    }

    /// Open an envelope produced by [`CipherCodec::encrypt`].
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.open(token, None)
    }

    /// Like [`CipherCodec::decrypt`], but also rejects envelopes issued more than `ttl_secs` ago.
    pub fn decrypt_with_ttl(&self, token: &[u8], ttl_secs: u64) -> Result<Vec<u8>, CipherError> {
        self.open(token, Some(ttl_secs))
    }

    fn open(&self, token: &[u8], ttl_secs: Option<u64>) -> Result<Vec<u8>, CipherError> {
        let envelope = BASE64_URL
            .decode(token)
            .map_err(|_| CipherError::Malformed("invalid base64"))?;

        if envelope.len() < HEADER_SIZE + NONCE_SIZE {
            return Err(CipherError::Malformed("envelope too short"));
        }
        if envelope[0] != VERSION {
            return Err(CipherError::Malformed("unknown envelope version"));
        }

        let (header, rest) = envelope.split_at(HEADER_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| CipherError::Integrity)?;

        // Only trust the timestamp once it has been authenticated
        if let Some(ttl_secs) = ttl_secs {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&header[1..]);
            let issued_at = i64::from_be_bytes(ts);
            let age_secs = Utc::now().timestamp() - issued_at;

            if age_secs < -MAX_CLOCK_SKEW_SECS {
                return Err(CipherError::Malformed("envelope issued in the future"));
            }
            if age_secs > ttl_secs as i64 {
                return Err(CipherError::Expired { age_secs, ttl_secs });
            }
        }

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn test_derive_key_is_stable() {
        let first = derive_key(SECRET).unwrap();
        let second = derive_key(SECRET).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_bytes().len(), KEY_SIZE);
        assert_eq!(first.as_bytes()[0], 0x00);
        assert_eq!(first.as_bytes()[1], 0x11);
        assert_eq!(first.as_bytes()[31], 0xff);
    }

    #[test]
    fn test_derive_key_encoding_is_url_safe() {
        let key = derive_key(&"ff".repeat(32)).unwrap();
        let encoded = key.encoded();
        // 0xff bytes produce '/' in the standard alphabet
        assert!(encoded.contains('_'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('+'));
        assert_eq!(BASE64_URL.decode(&encoded).unwrap(), vec![0xff; 32]);
    }

    #[test]
    fn test_derive_key_uppercase_hex() {
        let lower = derive_key(SECRET).unwrap();
        let upper = derive_key(&SECRET.to_uppercase()).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_derive_key_wrong_length() {
        assert_eq!(
            derive_key(&SECRET[..63]),
            Err(KeyFormatError::WrongLength { found: 63 })
        );
        assert_eq!(
            derive_key(""),
            Err(KeyFormatError::WrongLength { found: 0 })
        );
        assert!(matches!(
            derive_key(&format!("{}00", SECRET)),
            Err(KeyFormatError::WrongLength { found: 66 })
        ));
    }

    #[test]
    fn test_derive_key_non_hex() {
        let secret = format!("g{}", &SECRET[1..]);
        assert_eq!(secret.len(), 64);
        assert_eq!(derive_key(&secret), Err(KeyFormatError::NonHex));
    }

    #[test]
    fn test_derive_key_multibyte_character() {
        // 64 characters, 65 bytes
        let secret = format!("é{}", &SECRET[1..]);
        assert_eq!(secret.chars().count(), 64);
        assert_eq!(secret.len(), 65);
        assert_eq!(derive_key(&secret), Err(KeyFormatError::NonHex));

        // 63 characters, 64 bytes
        let secret = format!("é{}", &SECRET[2..]);
        assert_eq!(secret.len(), 64);
        assert_eq!(
            derive_key(&secret),
            Err(KeyFormatError::WrongLength { found: 63 })
        );
    }

    #[test]
    fn test_generate_secret() {
        let secret = CipherCodec::generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(derive_key(&secret).is_ok());
        assert_ne!(secret, CipherCodec::generate_secret());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();
        let plaintext = br#"{"access_token":"gho_123"}"#;

        let token = codec.encrypt(plaintext).unwrap();
        assert!(!token.windows(7).any(|w| w == b"gho_123"));
        assert_eq!(codec.decrypt(&token).unwrap(), plaintext);
    }

    #[test]
    fn test_unique_nonces() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();
        let a = codec.encrypt(b"same").unwrap();
        let b = codec.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();
        let other = CipherCodec::from_secret(&"ab".repeat(32)).unwrap();

        let token = codec.encrypt(b"secret").unwrap();
        assert_eq!(other.decrypt(&token), Err(CipherError::Integrity));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();
        let token = codec.encrypt(b"secret payload").unwrap();

        let mut envelope = BASE64_URL.decode(&token).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        let tampered = BASE64_URL.encode(&envelope).into_bytes();
        assert_eq!(codec.decrypt(&tampered), Err(CipherError::Integrity));

        // Header is authenticated too
        let mut envelope = BASE64_URL.decode(&token).unwrap();
        envelope[4] ^= 0x01;
        let tampered = BASE64_URL.encode(&envelope).into_bytes();
        assert_eq!(codec.decrypt(&tampered), Err(CipherError::Integrity));
    }

    #[test]
    fn test_malformed_input() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();
        assert!(matches!(
            codec.decrypt(b"not base64 !!"),
            Err(CipherError::Malformed(_))
        ));
        assert!(matches!(
            codec.decrypt(BASE64_URL.encode([VERSION, 0, 0]).as_bytes()),
            Err(CipherError::Malformed(_))
        ));

        let mut envelope = BASE64_URL.decode(codec.encrypt(b"x").unwrap()).unwrap();
        envelope[0] = 0x7f;
        assert_eq!(
            codec.decrypt(BASE64_URL.encode(&envelope).as_bytes()),
            Err(CipherError::Malformed("unknown envelope version"))
        );
    }

    #[test]
    fn test_decrypt_with_ttl() {
        let codec = CipherCodec::from_secret(SECRET).unwrap();

        let fresh = codec.encrypt(b"payload").unwrap();
        assert_eq!(codec.decrypt_with_ttl(&fresh, 60).unwrap(), b"payload");

        let old = codec
            .encrypt_at(b"payload", Utc::now().timestamp() - 3600)
            .unwrap();
        assert!(matches!(
            codec.decrypt_with_ttl(&old, 60),
            Err(CipherError::Expired { ttl_secs: 60, .. })
        ));
        // Without a TTL age is irrelevant
        assert_eq!(codec.decrypt(&old).unwrap(), b"payload");

        let future = codec
            .encrypt_at(b"payload", Utc::now().timestamp() + 3600)
            .unwrap();
        assert!(matches!(
            codec.decrypt_with_ttl(&future, 60),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = derive_key(SECRET).unwrap();
        assert_eq!(format!("{:?}", key), "DerivedKey(<redacted>)");
        let codec = CipherCodec::new(&key);
        assert_eq!(format!("{:?}", codec), "CipherCodec(<redacted>)");
    }
}
