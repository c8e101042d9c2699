//! Single-file encryption outside any archive.
//!
//! An encrypted file is one record with no self-check prefix: header region
//! followed by the padded payload.  Both directions work in place on the same
//! handle, so the file is never copied.

use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use log::{info, warn};

use crate::archive::ArchiveOptions;
use crate::crypto::{BlockCipher, Key};
use crate::error::{Error, Result};
use crate::io_stream::{transform_in_place, Direction};
use crate::record::{decode_header, encode_header, RecordHeader, MIN_HEADER_SIZE};
use crate::splice::shift_range;
use crate::storage::Storage;

/// Encrypt the whole of `storage` in place under a record header carrying
/// `description`.
pub fn encrypt_file<S: Storage + ?Sized>(
    storage:     &mut S,
    description: &str,
    key:         &Key,
    options:     &ArchiveOptions,
) -> Result<RecordHeader> {
    let options = options.validated();
    let cipher = BlockCipher::new(key, options.passes);

    let mut header = RecordHeader::new(description)?;
    let length = storage.len()?;
    header.payload_length = length;
    let header_bytes = header.header_bytes();

    shift_range(storage, header_bytes as i64, 0, length, options.splice_chunk_size)?;
    let summary = transform_in_place(
        storage,
        header_bytes,
        length,
        Direction::Encrypt,
        &cipher,
        options.io_buffer_size,
    )?;
    header.payload_checksum = summary.checksum;

    storage.seek(SeekFrom::Start(0))?;
    storage.write_all(&encode_header(&header, &cipher)?)?;
    storage.flush()?;
    Ok(header)
}

/// Reverse [`encrypt_file`].  Returns the header that was stripped.
///
/// A payload checksum mismatch is reported only after the file has been
/// fully decrypted and truncated to its stated length.
pub fn decrypt_file<S: Storage + ?Sized>(
    storage: &mut S,
    key:     &Key,
    options: &ArchiveOptions,
) -> Result<RecordHeader> {
    let options = options.validated();
    let cipher = BlockCipher::new(key, options.passes);

    let file_size = storage.len()?;
    if file_size < MIN_HEADER_SIZE {
        return Err(Error::NotAnArchiveFile);
    }
    storage.seek(SeekFrom::Start(0))?;
    let header = decode_header(storage, &cipher, 0).map_err(|e| match e {
        Error::Io(io) => Error::Io(io),
        _ => Error::NotAnArchiveFile,
    })?;

    let header_bytes = header.header_bytes();
    let available = file_size - header_bytes;
    if available != header.padded_payload_len() {
        return Err(Error::TruncatedOrForeign { stated: header.payload_length, available });
    }

    if available == 0 {
        storage.set_len(0)?;
    } else {
        shift_range(storage, -(header_bytes as i64), header_bytes, file_size, options.splice_chunk_size)?;
    }
    let summary = transform_in_place(
        storage,
        0,
        header.payload_length,
        Direction::Decrypt,
        &cipher,
        options.io_buffer_size,
    )?;
    storage.set_len(header.payload_length)?;
    storage.flush()?;

    if summary.checksum != header.payload_checksum {
        warn!("decrypted '{}' but its payload checksum does not match", header.description);
        return Err(Error::PayloadChecksumMismatch {
            expected: header.payload_checksum,
            actual:   summary.checksum,
        });
    }
    Ok(header)
}

/// [`encrypt_file`] on the file at `path`.
pub fn encrypt_path<P: AsRef<Path>>(
    path:        P,
    description: &str,
    key:         &Key,
    options:     &ArchiveOptions,
) -> Result<RecordHeader> {
    let path = path.as_ref();
    let mut file = open_rw(path)?;
    let header = encrypt_file(&mut file, description, key, options)?;
    info!("encrypted {} ({} B)", path.display(), header.payload_length);
    Ok(header)
}

/// [`decrypt_file`] on the file at `path`.
pub fn decrypt_path<P: AsRef<Path>>(path: P, key: &Key, options: &ArchiveOptions) -> Result<RecordHeader> {
    let path = path.as_ref();
    let mut file = open_rw(path)?;
    let header = decrypt_file(&mut file, key, options)?;
    info!("decrypted {} ({} B)", path.display(), header.payload_length);
    Ok(header)
}

fn open_rw(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(format!("file '{}'", path.display())),
            _ => Error::Io(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use std::io::Cursor;

    fn key() -> Key {
        Key::new([0x99; KEY_SIZE])
    }

    fn opts() -> ArchiveOptions {
        ArchiveOptions { passes: 1, io_buffer_size: 48, splice_chunk_size: 40 }
    }

    #[test]
    fn roundtrip_restores_exact_bytes() {
        let original: Vec<u8> = (0..777u32).map(|i| (i ^ 0x5A) as u8).collect();
        let mut f = Cursor::new(original.clone());

        let header = encrypt_file(&mut f, "notes.txt", &key(), &opts()).unwrap();
        assert_eq!(header.payload_length, 777);
        assert_eq!(f.get_ref().len() as u64, header.span());
        assert_ne!(f.get_ref()[64..841], original[..]);

        let back = decrypt_file(&mut f, &key(), &opts()).unwrap();
        assert_eq!(back.description, "notes.txt");
        assert_eq!(*f.get_ref(), original);
    }

    #[test]
    fn empty_file_roundtrip() {
        let mut f = Cursor::new(Vec::new());
        encrypt_file(&mut f, "", &key(), &opts()).unwrap();
        assert_eq!(f.get_ref().len() as u64, MIN_HEADER_SIZE);
        decrypt_file(&mut f, &key(), &opts()).unwrap();
        assert!(f.get_ref().is_empty());
    }

    #[test]
    fn wrong_key_is_not_an_archive_file() {
        let mut f = Cursor::new(b"plain data".to_vec());
        encrypt_file(&mut f, "x", &key(), &opts()).unwrap();
        let before = f.get_ref().clone();
        let other = Key::new([0x98; KEY_SIZE]);
        assert!(matches!(decrypt_file(&mut f, &other, &opts()), Err(Error::NotAnArchiveFile)));
        assert_eq!(*f.get_ref(), before);
    }

    #[test]
    fn plaintext_file_is_rejected() {
        let mut tiny = Cursor::new(b"short".to_vec());
        assert!(matches!(decrypt_file(&mut tiny, &key(), &opts()), Err(Error::NotAnArchiveFile)));
        let mut plain = Cursor::new(vec![b'z'; 300]);
        assert!(matches!(decrypt_file(&mut plain, &key(), &opts()), Err(Error::NotAnArchiveFile)));
    }

    #[test]
    fn truncated_file_detected() {
        let mut f = Cursor::new(vec![3u8; 100]);
        encrypt_file(&mut f, "t", &key(), &opts()).unwrap();
        let len = f.get_ref().len();
        f.get_mut().truncate(len - 16);
        assert!(matches!(
            decrypt_file(&mut f, &key(), &opts()),
            Err(Error::TruncatedOrForeign { stated: 100, .. })
        ));
    }

    #[test]
    fn payload_corruption_still_decrypts() {
        let mut f = Cursor::new(vec![1u8; 64]);
        let header = encrypt_file(&mut f, "c", &key(), &opts()).unwrap();
        let at = header.header_bytes() as usize + 17;
        f.get_mut()[at] ^= 0x04;
        let err = decrypt_file(&mut f, &key(), &opts()).unwrap_err();
        assert!(matches!(err, Error::PayloadChecksumMismatch { .. }));
        assert_eq!(f.get_ref().len(), 64);
    }
}
