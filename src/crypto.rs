//! AES-256 block encryption for chunk data and the directory index.
//!
//! The format encrypts each compression block independently, in place, as a
//! sequence of 16-byte cipher blocks.  On-disk block payloads are therefore
//! always padded to [`AES_BLOCK_SIZE`]; the TOC records the true compressed
//! size so readers can trim the pad after decryption.
//!
//! Key material is injected by the caller and selected through the header's
//! encryption key GUID; nothing here touches key storage.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use thiserror::Error;

/// Cipher block granularity; every encrypted payload is a multiple of this.
pub const AES_BLOCK_SIZE: usize = 16;
/// AES-256 key length in bytes.
pub const AES_KEY_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("data length {0} is not a multiple of the AES block size")]
    Misaligned(usize),
    #[error("invalid AES key: {0}")]
    InvalidKey(String),
}

/// A 256-bit symmetric container key.
#[derive(Clone)]
pub struct AesKey([u8; AES_KEY_SIZE]);

impl AesKey {
    pub fn from_bytes(bytes: [u8; AES_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(hex_str).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; AES_KEY_SIZE] = raw
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {AES_KEY_SIZE} bytes")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.write_str("AesKey(..)")
    }
}

/// Round `len` up to the next AES block boundary.
pub fn align_to_aes(len: u64) -> u64 {
    (len + AES_BLOCK_SIZE as u64 - 1) & !(AES_BLOCK_SIZE as u64 - 1)
}

/// Encrypt `data` in place.  The length must be a multiple of 16.
pub fn encrypt_in_place(key: &AesKey, data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::Misaligned(data.len()));
    }
    let cipher = Aes256::new(GenericArray::from_slice(&key.0));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// Decrypt `data` in place.  The length must be a multiple of 16.
pub fn decrypt_in_place(key: &AesKey, data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::Misaligned(data.len()));
    }
    let cipher = Aes256::new(GenericArray::from_slice(&key.0));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AesKey {
        let mut bytes = [0u8; AES_KEY_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        AesKey::from_bytes(bytes)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let original: Vec<u8> = (0u8..=255).cycle().take(256).collect();
        let mut data = original.clone();

        encrypt_in_place(&key, &mut data).unwrap();
        assert_ne!(data, original);
        decrypt_in_place(&key, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let key = test_key();
        let mut data = vec![0u8; 15];
        assert!(matches!(
            encrypt_in_place(&key, &mut data),
            Err(CryptoError::Misaligned(15))
        ));
        assert!(matches!(
            decrypt_in_place(&key, &mut data),
            Err(CryptoError::Misaligned(15))
        ));
    }

    #[test]
    fn empty_buffer_is_fine() {
        let key = test_key();
        let mut data: Vec<u8> = Vec::new();
        encrypt_in_place(&key, &mut data).unwrap();
        decrypt_in_place(&key, &mut data).unwrap();
    }

    #[test]
    fn alignment_helper() {
        assert_eq!(align_to_aes(0), 0);
        assert_eq!(align_to_aes(1), 16);
        assert_eq!(align_to_aes(16), 16);
        assert_eq!(align_to_aes(17), 32);
    }

    #[test]
    fn key_from_hex() {
        let hex_key = "00".repeat(AES_KEY_SIZE);
        assert!(AesKey::from_hex(&hex_key).is_ok());
        assert!(AesKey::from_hex("deadbeef").is_err());
        assert!(AesKey::from_hex("not hex").is_err());
    }
}
