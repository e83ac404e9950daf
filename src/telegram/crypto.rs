//! # Telegram Payload Decryption
//!
//! AES-128 handling for the two cipher layouts the cataloged meter families
//! transmit:
//!
//! 1. **Mode 5 (AES-128 CBC)**: announced by the configuration word of the
//!    short/long header. IV is M-field, A-field, then the access number
//!    repeated eight times. A correctly decrypted area starts with the
//!    `2F 2F` idle filler pair.
//! 2. **ELL (AES-128 CTR)**: the extended link layer of the Kamstrup C1
//!    meters. IV is M-field, A-field, the session word and a trailing block
//!    counter. The decrypted area starts with a CRC-16 over the remainder.
//!
//! Both modes are built from the `aes` block primitive; encryption
//! counterparts exist so tests can assemble cipher frames.

use crate::telegram::{crc16_en13757, Telegram};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

/// Errors from payload encryption handling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("Invalid key length: expected 16, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid cipher length: {0} is not a multiple of 16")]
    InvalidDataLength(usize),

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },
}

/// Encryption mode of a telegram's record area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    None,
    /// Mode 5 per the configuration word.
    Mode5Cbc,
    /// Extended link layer counter mode.
    EllCtr,
    Unknown(u8),
}

impl EncryptionMode {
    /// The mode bits live in the high byte of the configuration word.
    pub fn from_cfg(cfg: u16) -> Self {
        match (cfg >> 8) & 0x1F {
            0 => EncryptionMode::None,
            5 => EncryptionMode::Mode5Cbc,
            mode => EncryptionMode::Unknown(mode as u8),
        }
    }
}

/// A 16-byte AES key as configured per meter.
#[derive(Debug, Clone, PartialEq)]
pub struct AesKey {
    key: [u8; 16],
}

impl AesKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 16 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Parse the 32 hex character form used on the command line.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = crate::util::hex::decode_hex(hex_str)
            .map_err(|_| CryptoError::InvalidKeyLength(hex_str.len() / 2))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.key
    }
}

/// IV for mode 5: M(2, LE) then the 6-byte A-field then ACC eight times.
pub fn build_mode5_iv(t: &Telegram) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..8].copy_from_slice(&t.raw[2..10]);
    for slot in iv.iter_mut().skip(8) {
        *slot = t.acc;
    }
    iv
}

/// IV for the ELL counter: M(2, LE), A-field (6), session word (2, LE),
/// zeros, block counter in the final byte.
pub fn build_ell_iv(t: &Telegram) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..8].copy_from_slice(&t.raw[2..10]);
    iv[8..10].copy_from_slice(&t.session.to_le_bytes());
    iv
}

fn encrypt_block(key: &AesKey, block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut b = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut b);
    let mut out = [0u8; 16];
    out.copy_from_slice(&b);
    out
}

fn decrypt_block(key: &AesKey, block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut b = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut b);
    let mut out = [0u8; 16];
    out.copy_from_slice(&b);
    out
}

fn increment_counter(counter: &mut [u8; 16]) {
    for byte in counter.iter_mut().rev() {
        let (v, carry) = byte.overflowing_add(1);
        *byte = v;
        if !carry {
            break;
        }
    }
}

/// AES-128 CTR keystream application; identical for encrypt and decrypt.
pub fn aes_ctr_process(key: &AesKey, data: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut counter = *iv;
    for chunk in data.chunks(16) {
        let keystream = encrypt_block(key, &counter);
        for (i, &byte) in chunk.iter().enumerate() {
            result.push(byte ^ keystream[i]);
        }
        increment_counter(&mut counter);
    }
    result
}

/// AES-128 CBC decryption without padding; the record area uses `2F` idle
/// filler instead of PKCS#7.
pub fn aes_cbc_decrypt(key: &AesKey, ciphertext: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::InvalidDataLength(ciphertext.len()));
    }
    let mut result = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;
    for chunk in ciphertext.chunks_exact(16) {
        let mut block = [0u8; 16];
        block.copy_from_slice(chunk);
        let decrypted = decrypt_block(key, &block);
        for i in 0..16 {
            result.push(decrypted[i] ^ prev[i]);
        }
        prev = block;
    }
    Ok(result)
}

/// AES-128 CBC encryption without padding; input must be block aligned.
pub fn aes_cbc_encrypt(key: &AesKey, plaintext: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() || plaintext.len() % 16 != 0 {
        return Err(CryptoError::InvalidDataLength(plaintext.len()));
    }
    let mut result = Vec::with_capacity(plaintext.len());
    let mut prev = *iv;
    for chunk in plaintext.chunks_exact(16) {
        let mut block = [0u8; 16];
        block.copy_from_slice(chunk);
        for i in 0..16 {
            block[i] ^= prev[i];
        }
        let encrypted = encrypt_block(key, &block);
        result.extend_from_slice(&encrypted);
        prev = encrypted;
    }
    Ok(result)
}

/// Decrypt a mode 5 record area and verify the idle filler marker.
pub fn decrypt_mode5(t: &Telegram, key: &AesKey) -> Result<Vec<u8>, CryptoError> {
    let iv = build_mode5_iv(t);
    let plain = aes_cbc_decrypt(key, t.record_area(), &iv)?;
    if plain.len() < 2 || plain[0] != 0x2F || plain[1] != 0x2F {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("no 2F 2F marker after decryption of telegram from {}", t.id),
        });
    }
    Ok(plain)
}

/// Decrypt an ELL record area and verify its leading payload CRC.
///
/// Returns the record bytes with the CRC stripped.
pub fn decrypt_ell(t: &Telegram, key: &AesKey) -> Result<Vec<u8>, CryptoError> {
    let iv = build_ell_iv(t);
    let plain = aes_ctr_process(key, t.record_area(), &iv);
    if plain.len() < 2 {
        return Err(CryptoError::DecryptionFailed {
            reason: "payload too short for CRC".to_string(),
        });
    }
    let expected = u16::from_le_bytes([plain[0], plain[1]]);
    let calculated = crc16_en13757(&plain[2..]);
    if expected != calculated {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "payload CRC mismatch on telegram from {}: expected {expected:04X}, calculated {calculated:04X}",
                t.id
            ),
        });
    }
    Ok(plain[2..].to_vec())
}

/// Build the cipher record area of an ELL frame from plaintext records.
pub fn encrypt_ell(records: &[u8], t: &Telegram, key: &AesKey) -> Vec<u8> {
    let mut plain = Vec::with_capacity(records.len() + 2);
    plain.extend_from_slice(&crc16_en13757(records).to_le_bytes());
    plain.extend_from_slice(records);
    let iv = build_ell_iv(t);
    aes_ctr_process(key, &plain, &iv)
}
