//! Record header codec.
//!
//! On-disk header region (all of it encrypted, big-endian integers):
//!
//! ```text
//! fixed section, 48 B (3 blocks)
//!   0  payload_length    u64
//!   8  desc_length       u64
//!  16  nonce             [u8; 16]
//!  32  header_checksum   u32   CRC-32 of the section with this slot zeroed
//!  36  desc_checksum     u32   CRC-32 of the raw description
//!  40  payload_checksum  u32   CRC-32 of the raw payload
//!  44  zero padding      [u8; 4]
//! description, desc_length bytes zero-padded to a block multiple
//! ```
//!
//! The payload follows immediately, padded to a block multiple.

use std::io::{self, Read};

use crate::checksum::checksum;
use crate::crypto::{padded_len, random_bytes, BlockCipher};
use crate::endian::{from_disk_u32, from_disk_u64, to_disk_u32, to_disk_u64};
use crate::error::{Error, Result};

/// Longest description a record may carry.
pub const DESC_MAX: usize = 1024;
/// Random bytes mixed into every header.
pub const NONCE_SIZE: usize = 16;
/// Padded size of the fixed header section.
pub const FIXED_SECTION_SIZE: usize = 48;
/// Fewer remaining bytes than this means end of archive.
pub const MIN_HEADER_SIZE: u64 = FIXED_SECTION_SIZE as u64;

const CHECKSUM_OFFSET: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub payload_length:   u64,
    pub payload_checksum: u32,
    pub nonce:            [u8; NONCE_SIZE],
    pub description:      String,
}

impl RecordHeader {
    /// A header for an empty payload with a fresh random nonce.
    pub fn new(description: &str) -> Result<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        random_bytes(&mut nonce)?;
        Self::with_nonce(description, nonce)
    }

    pub fn with_nonce(description: &str, nonce: [u8; NONCE_SIZE]) -> Result<Self> {
        check_description(description)?;
        Ok(Self {
            payload_length:   0,
            payload_checksum: checksum(&[]),
            nonce,
            description:      description.to_owned(),
        })
    }

    pub fn desc_checksum(&self) -> u32 {
        checksum(self.description.as_bytes())
    }

    /// Bytes occupied by the encrypted header region (fixed section plus
    /// padded description).
    pub fn header_bytes(&self) -> u64 {
        header_bytes_for(self.description.len())
    }

    pub fn padded_payload_len(&self) -> u64 {
        padded_len(self.payload_length)
    }

    /// Total on-disk span of the record.
    pub fn span(&self) -> u64 {
        self.header_bytes() + self.padded_payload_len()
    }

    fn fixed_section(&self) -> [u8; FIXED_SECTION_SIZE] {
        let mut fixed = [0u8; FIXED_SECTION_SIZE];
        to_disk_u64(
            &[self.payload_length, self.description.len() as u64],
            &mut fixed[..16],
        );
        fixed[16..CHECKSUM_OFFSET].copy_from_slice(&self.nonce);
        to_disk_u32(
            &[0, self.desc_checksum(), self.payload_checksum],
            &mut fixed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 12],
        );
        let header_checksum = checksum(&fixed);
        to_disk_u32(&[header_checksum], &mut fixed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]);
        fixed
    }
}

/// Header region size for a description of `desc_len` bytes.
pub fn header_bytes_for(desc_len: usize) -> u64 {
    FIXED_SECTION_SIZE as u64 + padded_len(desc_len as u64)
}

pub fn check_description(description: &str) -> Result<()> {
    if description.len() > DESC_MAX {
        return Err(Error::DescriptionTooLong { len: description.len(), max: DESC_MAX });
    }
    Ok(())
}

/// Serialize and encrypt `header`.  The returned buffer is exactly
/// `header.header_bytes()` long.
pub fn encode_header(header: &RecordHeader, cipher: &BlockCipher) -> Result<Vec<u8>> {
    check_description(&header.description)?;
    let desc = header.description.as_bytes();
    let mut out = vec![0u8; header.header_bytes() as usize];
    out[..FIXED_SECTION_SIZE].copy_from_slice(&header.fixed_section());
    out[FIXED_SECTION_SIZE..FIXED_SECTION_SIZE + desc.len()].copy_from_slice(desc);
    cipher.encrypt_blocks(&mut out);
    Ok(out)
}

/// Read and verify one header from `reader`.
///
/// `offset` is the archive position of the header and only feeds error
/// reports.  On success the reader sits on the first payload byte.
pub fn decode_header<R: Read + ?Sized>(
    reader: &mut R,
    cipher: &BlockCipher,
    offset: u64,
) -> Result<RecordHeader> {
    let mut fixed = [0u8; FIXED_SECTION_SIZE];
    read_section(reader, &mut fixed, Error::HeaderCorrupt { offset })?;
    cipher.decrypt_blocks(&mut fixed);

    let mut lengths = [0u64; 2];
    from_disk_u64(&fixed[..16], &mut lengths);
    let [payload_length, desc_length] = lengths;

    let mut sums = [0u32; 3];
    from_disk_u32(&fixed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 12], &mut sums);
    let [header_checksum, desc_checksum, payload_checksum] = sums;

    fixed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
    if checksum(&fixed) != header_checksum || desc_length > DESC_MAX as u64 {
        return Err(Error::HeaderCorrupt { offset });
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&fixed[16..CHECKSUM_OFFSET]);

    let desc_offset = offset + FIXED_SECTION_SIZE as u64;
    let mut desc = vec![0u8; padded_len(desc_length) as usize];
    read_section(reader, &mut desc, Error::DescriptionCorrupt { offset: desc_offset })?;
    cipher.decrypt_blocks(&mut desc);
    desc.truncate(desc_length as usize);

    if checksum(&desc) != desc_checksum {
        return Err(Error::DescriptionCorrupt { offset: desc_offset });
    }
    let description = String::from_utf8(desc)
        .map_err(|_| Error::DescriptionCorrupt { offset: desc_offset })?;

    Ok(RecordHeader { payload_length, payload_checksum, nonce, description })
}

// A short read inside a header is a format error, not an I/O failure.
fn read_section<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], short: Error) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(short),
        Err(e) => Err(e.into()),
    }
}
