//! Error taxonomy shared by every layer of the archive core.
//!
//! Integrity failures on the header or description abort the current
//! operation: skipping a record would desynchronise every later offset.
//! [`Error::PayloadChecksumMismatch`] is the one advisory kind; it is only
//! returned after the decoded bytes have been delivered to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid key size: expected 32 bytes, got {0}")]
    InvalidKeySize(usize),
    #[error("Key is not valid base64: {0}")]
    InvalidKeyEncoding(String),
    #[error("The given key doesn't match the archive's key")]
    KeyMismatch,
    #[error("File '{}' already exists, refusing to overwrite", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Record header at offset {offset} is corrupt or was encrypted with another key")]
    HeaderCorrupt { offset: u64 },
    #[error("Record description at offset {offset} is corrupt")]
    DescriptionCorrupt { offset: u64 },
    #[error("Description is {len} bytes, the maximum is {max}")]
    DescriptionTooLong { len: usize, max: usize },
    #[error("Payload checksum mismatch (stored {expected:08x}, computed {actual:08x})")]
    PayloadChecksumMismatch { expected: u32, actual: u32 },
    #[error("Not an encrypted aar file")]
    NotAnArchiveFile,
    #[error("Payload states {stated} bytes but {available} bytes are available")]
    TruncatedOrForeign { stated: u64, available: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `true` for failures where the record layout itself can no longer be
    /// trusted, as opposed to advisory payload corruption.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::HeaderCorrupt { .. }
                | Error::DescriptionCorrupt { .. }
                | Error::TruncatedOrForeign { .. }
                | Error::NotAnArchiveFile
        )
    }
}
