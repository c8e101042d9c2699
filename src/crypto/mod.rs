//! AES-256 block layer and key handling for aar archives.
//!
//! Encryption:  AES-256 applied to each 16-byte block independently (ECB),
//!              repeated for a configured number of passes.
//! Key text:    standard base64, always 44 characters for a 32-byte key.
//!
//! ECB leaks equality of plaintext blocks.  The on-disk format depends on it,
//! so any change of mode is a new format, not a fix.

use std::fmt;
use std::io;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};

/// Byte size of an archive key.
pub const KEY_SIZE: usize = 32;
/// Byte size of a cipher block; every encrypted region is a multiple of it.
pub const BLOCK_SIZE: usize = 16;
/// Length of the base64 text form of a key.
pub const BASE64_KEY_LEN: usize = 44;
/// Default number of cipher passes.
pub const DEFAULT_PASSES: usize = 1;

/// Round `n` up to the next multiple of [`BLOCK_SIZE`].  Zero stays zero.
#[inline]
pub const fn padded_len(n: u64) -> u64 {
    let rem = n % BLOCK_SIZE as u64;
    if rem == 0 { n } else { n + (BLOCK_SIZE as u64 - rem) }
}

/// Number of blocks needed to hold `n` bytes.
#[inline]
pub const fn block_count(n: u64) -> u64 {
    padded_len(n) / BLOCK_SIZE as u64
}

// ── Key ──────────────────────────────────────────────────────────────────────

/// A raw 256-bit archive key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeySize(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Draw a fresh key from the OS entropy source.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        random_bytes(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let text = text.trim();
        let raw = STANDARD
            .decode(text)
            .map_err(|e| Error::InvalidKeyEncoding(e.to_string()))?;
        Self::from_slice(&raw)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Fill `buf` from the OS entropy source.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(io::Error::from)?;
    Ok(())
}

// ── Block cipher ─────────────────────────────────────────────────────────────

/// AES-256 in ECB mode over whole blocks, applied `passes` times.
#[derive(Clone)]
pub struct BlockCipher {
    aes:    Aes256,
    passes: usize,
}

impl BlockCipher {
    pub fn new(key: &Key, passes: usize) -> Self {
        Self {
            aes:    Aes256::new(GenericArray::from_slice(key.as_bytes())),
            passes: passes.max(1),
        }
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Encrypt `buf` in place.  `buf.len()` must be a multiple of [`BLOCK_SIZE`].
    pub fn encrypt_blocks(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % BLOCK_SIZE, 0, "unaligned cipher buffer");
        for _ in 0..self.passes {
            for block in buf.chunks_exact_mut(BLOCK_SIZE) {
                self.aes.encrypt_block(GenericArray::from_mut_slice(block));
            }
        }
    }

    /// Decrypt `buf` in place.  `buf.len()` must be a multiple of [`BLOCK_SIZE`].
    pub fn decrypt_blocks(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % BLOCK_SIZE, 0, "unaligned cipher buffer");
        for _ in 0..self.passes {
            for block in buf.chunks_exact_mut(BLOCK_SIZE) {
                self.aes.decrypt_block(GenericArray::from_mut_slice(block));
            }
        }
    }
}

impl fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCipher").field("passes", &self.passes).finish_non_exhaustive()
    }
}
