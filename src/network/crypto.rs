//! XSalsa20-Poly1305 packet sealing

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;

use crate::error::NetworkError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
/// Authentication overhead appended after the ciphertext
pub const TAG_LEN: usize = 16;

/// Authenticated encryption with the session's secret key
pub struct SecretBox {
    cipher: XSalsa20Poly1305,
}

impl SecretBox {
    pub fn new(key: &[u8]) -> Result<Self, NetworkError> {
        let cipher = XSalsa20Poly1305::new_from_slice(key)
            .map_err(|_| NetworkError::InvalidSecretKey(key.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `payload` in place and return its authentication tag
    pub fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        payload: &mut [u8],
    ) -> Result<[u8; TAG_LEN], NetworkError> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", payload)
            .map_err(|_| NetworkError::EncryptionFailed)?;

        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify and decrypt `payload` in place
    pub fn open_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        payload: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<(), NetworkError> {
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                b"",
                payload,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| NetworkError::EncryptionFailed)
    }
}
