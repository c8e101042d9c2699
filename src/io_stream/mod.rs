//! Streaming payload codec.
//!
//! Payloads are moved through one bounded buffer regardless of their size.
//! Each chunk is encrypted as whole blocks; only the final chunk can be
//! short, and its zero padding is neither checksummed nor counted in the
//! payload length.
//!
//! Three shapes are provided:
//! - [`encode_payload`]: plaintext reader → ciphertext writer (append/insert)
//! - [`decode_payload`]: ciphertext reader → plaintext writer (extraction)
//! - [`transform_in_place`]: rewrite a region of one storage handle
//!   (standalone file encryption)

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::checksum::Checksum;
use crate::crypto::{padded_len, BlockCipher, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::storage::{read_full, Storage};

/// Default payload buffer: 64 KiB.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// Length and checksum of the plaintext that went through a codec call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSummary {
    pub length:   u64,
    pub checksum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Round a requested buffer size to a non-zero multiple of the block size.
pub fn aligned_buffer_size(requested: usize) -> usize {
    padded_len(requested.max(BLOCK_SIZE) as u64) as usize
}

/// Encrypt everything `source` yields into `sink`.
pub fn encode_payload<R, W>(
    source:   &mut R,
    sink:     &mut W,
    cipher:   &BlockCipher,
    buf_size: usize,
) -> Result<PayloadSummary>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let buf_size = aligned_buffer_size(buf_size);
    let mut buf = vec![0u8; buf_size];
    let mut sum = Checksum::new();
    let mut length = 0u64;

    loop {
        let n = read_full(source, &mut buf)?;
        if n == 0 {
            break;
        }
        sum.update(&buf[..n]);
        length += n as u64;

        let padded = padded_len(n as u64) as usize;
        buf[n..padded].fill(0);
        cipher.encrypt_blocks(&mut buf[..padded]);
        sink.write_all(&buf[..padded])?;

        if n < buf_size {
            break;
        }
    }

    Ok(PayloadSummary { length, checksum: sum.finalize() })
}

/// Decrypt a `payload_length`-byte payload from `source` into `sink`.
///
/// Reads the padded length from `source` but delivers exactly
/// `payload_length` bytes.  Returns the checksum of the delivered bytes.
pub fn decode_payload<R, W>(
    source:         &mut R,
    sink:           &mut W,
    cipher:         &BlockCipher,
    payload_length: u64,
    buf_size:       usize,
) -> Result<u32>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let buf_size = aligned_buffer_size(buf_size);
    let mut buf = vec![0u8; buf_size.min(padded_len(payload_length) as usize).max(BLOCK_SIZE)];
    let mut sum = Checksum::new();
    let mut remaining = payload_length;

    while remaining > 0 {
        let want = padded_len(remaining).min(buf.len() as u64) as usize;
        read_payload_chunk(source, &mut buf[..want], payload_length, payload_length - remaining)?;
        cipher.decrypt_blocks(&mut buf[..want]);

        let take = remaining.min(want as u64) as usize;
        sum.update(&buf[..take]);
        sink.write_all(&buf[..take])?;
        remaining -= take as u64;
    }

    Ok(sum.finalize())
}

/// Encrypt or decrypt `length` plaintext bytes starting at `start`, writing
/// each chunk back over itself.
///
/// Encrypting grows the region to its padded length; decrypting leaves the
/// padding in place for the caller to truncate.  The checksum always covers
/// the plaintext side.
pub fn transform_in_place<S: Storage + ?Sized>(
    storage:   &mut S,
    start:     u64,
    length:    u64,
    direction: Direction,
    cipher:    &BlockCipher,
    buf_size:  usize,
) -> Result<PayloadSummary> {
    let buf_size = aligned_buffer_size(buf_size);
    let mut buf = vec![0u8; buf_size.min(padded_len(length) as usize).max(BLOCK_SIZE)];
    let mut sum = Checksum::new();
    let mut pos = start;
    let mut remaining = length;

    while remaining > 0 {
        let take = remaining.min(buf.len() as u64) as usize;
        let padded = padded_len(take as u64) as usize;
        let done = length - remaining;

        storage.seek(SeekFrom::Start(pos))?;
        match direction {
            Direction::Encrypt => {
                read_payload_chunk(storage, &mut buf[..take], length, done)?;
                buf[take..padded].fill(0);
                sum.update(&buf[..take]);
                cipher.encrypt_blocks(&mut buf[..padded]);
            }
            Direction::Decrypt => {
                read_payload_chunk(storage, &mut buf[..padded], length, done)?;
                cipher.decrypt_blocks(&mut buf[..padded]);
                sum.update(&buf[..take]);
            }
        }
        storage.seek(SeekFrom::Start(pos))?;
        storage.write_all(&buf[..padded])?;

        pos += padded as u64;
        remaining -= take as u64;
    }
    storage.flush()?;

    Ok(PayloadSummary { length, checksum: sum.finalize() })
}

fn read_payload_chunk<R: Read + ?Sized>(
    source:    &mut R,
    buf:       &mut [u8],
    stated:    u64,
    delivered: u64,
) -> Result<()> {
    match source.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::TruncatedOrForeign { stated, available: delivered })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::crypto::Key;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn cipher() -> BlockCipher {
        BlockCipher::new(&Key::new([0x33; 32]), 1)
    }

    #[test]
    fn encode_pads_final_chunk_only() {
        let data: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
        let mut out = Vec::new();
        let summary = encode_payload(&mut &data[..], &mut out, &cipher(), 32).unwrap();
        assert_eq!(summary.length, 100);
        assert_eq!(summary.checksum, checksum(&data));
        assert_eq!(out.len(), 112);
    }

    #[test]
    fn empty_payload_writes_nothing() {
        let mut out = Vec::new();
        let summary = encode_payload(&mut io::empty(), &mut out, &cipher(), 64).unwrap();
        assert_eq!(summary, PayloadSummary { length: 0, checksum: checksum(&[]) });
        assert!(out.is_empty());

        let mut plain = Vec::new();
        let sum = decode_payload(&mut &out[..], &mut plain, &cipher(), 0, 64).unwrap();
        assert_eq!(sum, checksum(&[]));
        assert!(plain.is_empty());
    }

    #[test]
    fn decode_stops_at_payload_length() {
        let data = b"exactly nineteen b.".to_vec();
        let mut enc = Vec::new();
        encode_payload(&mut &data[..], &mut enc, &cipher(), 16).unwrap();
        enc.extend_from_slice(&[0xFF; 48]); // next record

        let mut src = Cursor::new(enc);
        let mut plain = Vec::new();
        let sum = decode_payload(&mut src, &mut plain, &cipher(), data.len() as u64, 16).unwrap();
        assert_eq!(plain, data);
        assert_eq!(sum, checksum(&data));
        assert_eq!(src.position(), 32);
    }

    #[test]
    fn short_ciphertext_is_truncated() {
        let enc = vec![0u8; 32];
        let err = decode_payload(&mut &enc[..], &mut io::sink(), &cipher(), 100, 64).unwrap_err();
        assert!(matches!(err, Error::TruncatedOrForeign { stated: 100, .. }));
    }

    #[test]
    fn in_place_roundtrip_with_prefix() {
        let prefix = vec![0xAB; 48];
        let body: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let mut file = Cursor::new([prefix.clone(), body.clone()].concat());

        let enc = transform_in_place(&mut file, 48, 1000, Direction::Encrypt, &cipher(), 64).unwrap();
        assert_eq!(enc.checksum, checksum(&body));
        assert_eq!(file.get_ref().len(), 48 + 1008);
        assert_eq!(file.get_ref()[..48], prefix[..]);

        let dec = transform_in_place(&mut file, 48, 1000, Direction::Decrypt, &cipher(), 64).unwrap();
        assert_eq!(dec.checksum, enc.checksum);
        assert_eq!(file.get_ref()[48..1048], body[..]);
    }

    proptest! {
        #[test]
        fn payload_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..3000), buf in 1usize..200) {
            let mut enc = Vec::new();
            let summary = encode_payload(&mut &data[..], &mut enc, &cipher(), buf).unwrap();
            prop_assert_eq!(enc.len() as u64, padded_len(data.len() as u64));

            let mut plain = Vec::new();
            let sum = decode_payload(&mut &enc[..], &mut plain, &cipher(), summary.length, buf).unwrap();
            prop_assert_eq!(sum, summary.checksum);
            prop_assert_eq!(plain, data);
        }
    }
}
