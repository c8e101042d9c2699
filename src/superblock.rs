//! Archive prefix: the self-check value.
//!
//! The first 32 bytes of an archive are the key encrypted with itself.
//! Decrypting them with a candidate key and getting the candidate back
//! proves the key matches, without the key ever being stored in plaintext.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::crypto::{BlockCipher, Key, KEY_SIZE};
use crate::error::{Error, Result};

/// Size of the archive prefix; the first record starts here.
pub const SELF_CHECK_SIZE: u64 = KEY_SIZE as u64;

#[derive(Clone, PartialEq, Eq)]
pub struct SelfCheck {
    pub encrypted_key: [u8; KEY_SIZE],
}

impl SelfCheck {
    pub fn new(key: &Key, cipher: &BlockCipher) -> Self {
        let mut encrypted_key = *key.as_bytes();
        cipher.encrypt_blocks(&mut encrypted_key);
        Self { encrypted_key }
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encrypted_key)?;
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut encrypted_key = [0u8; KEY_SIZE];
        reader.read_exact(&mut encrypted_key)?;
        Ok(Self { encrypted_key })
    }

    pub fn matches(&self, key: &Key, cipher: &BlockCipher) -> bool {
        let mut plain = self.encrypted_key;
        cipher.decrypt_blocks(&mut plain);
        plain == *key.as_bytes()
    }
}

/// Check `key` against the self-check value at the start of `storage`.
///
/// `cipher` must be built from `key`.  The cursor is left just past the
/// prefix.
pub fn validate_key<S: Read + Seek + ?Sized>(
    storage: &mut S,
    key:     &Key,
    cipher:  &BlockCipher,
) -> Result<()> {
    storage.seek(SeekFrom::Start(0))?;
    let check = SelfCheck::read(storage).map_err(|e| match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => Error::KeyMismatch,
        other => other,
    })?;
    if check.matches(key, cipher) {
        Ok(())
    } else {
        Err(Error::KeyMismatch)
    }
}
