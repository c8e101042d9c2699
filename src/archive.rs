//! Archive engine: a self-check prefix followed by spliceable encrypted records.
//!
//! ```no_run
//! use aar::archive::{Archive, ArchiveOptions};
//! use aar::crypto::Key;
//!
//! let key = Key::generate()?;
//!
//! // Write
//! let mut ar = Archive::create("out.aar", &key, ArchiveOptions::default())?;
//! ar.append("readme.txt", &b"Hello, world!"[..])?;
//!
//! // Read
//! let mut ar = Archive::open("out.aar", &key, ArchiveOptions::default())?;
//! let mut data = Vec::new();
//! ar.read_payload(0, &mut data)?;
//! assert_eq!(data, b"Hello, world!");
//! # Ok::<(), aar::Error>(())
//! ```
//!
//! Records are located by walking headers from the start of the archive;
//! nothing is cached between calls.  Offsets returned by one call are stale
//! after any insert, delete or rename.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::crypto::{BlockCipher, Key, DEFAULT_PASSES};
use crate::error::{Error, Result};
use crate::io_stream::{aligned_buffer_size, decode_payload, encode_payload, DEFAULT_IO_BUFFER_SIZE};
use crate::record::{check_description, decode_header, encode_header, RecordHeader, MIN_HEADER_SIZE};
use crate::splice::{shift_range, DEFAULT_SPLICE_CHUNK_SIZE};
use crate::storage::Storage;
use crate::superblock::{self, SelfCheck, SELF_CHECK_SIZE};

// ── ArchiveOptions ────────────────────────────────────────────────────────────

/// Tunables for an archive session.  `passes` is part of the format: an
/// archive must be reopened with the pass count it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub passes:            usize,
    /// Payload streaming buffer, rounded up to a block multiple.
    pub io_buffer_size:    usize,
    /// Bounded buffer used when records are spliced in or out.
    pub splice_chunk_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            passes:            DEFAULT_PASSES,
            io_buffer_size:    DEFAULT_IO_BUFFER_SIZE,
            splice_chunk_size: DEFAULT_SPLICE_CHUNK_SIZE,
        }
    }
}

impl ArchiveOptions {
    /// Normalize out-of-range values instead of rejecting them.
    pub fn validated(self) -> Self {
        Self {
            passes:            self.passes.max(1),
            io_buffer_size:    aligned_buffer_size(self.io_buffer_size),
            splice_chunk_size: self.splice_chunk_size.max(1),
        }
    }
}

// ── RecordEntry / ListEntry ──────────────────────────────────────────────────

/// A decoded header together with where its record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub index:          usize,
    /// Offset of the first header byte.
    pub offset:         u64,
    /// Offset of the first payload byte.
    pub payload_offset: u64,
    pub header:         RecordHeader,
}

impl RecordEntry {
    pub fn payload_length(&self) -> u64 {
        self.header.payload_length
    }

    pub fn span(&self) -> u64 {
        self.header.span()
    }

    /// Offset just past the record's padded payload.
    pub fn end(&self) -> u64 {
        self.offset + self.span()
    }
}

/// Lightweight descriptor returned by [`Archive::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub index:          usize,
    pub description:    String,
    pub payload_length: u64,
}

impl From<&RecordEntry> for ListEntry {
    fn from(e: &RecordEntry) -> Self {
        ListEntry {
            index:          e.index,
            description:    e.header.description.clone(),
            payload_length: e.header.payload_length,
        }
    }
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive<S: Storage = File> {
    storage: S,
    path:    Option<PathBuf>,
    cipher:  BlockCipher,
    options: ArchiveOptions,
}

impl Archive<File> {
    /// Create a new archive file.  Fails with [`Error::AlreadyExists`] rather
    /// than overwrite anything.
    pub fn create<P: AsRef<Path>>(path: P, key: &Key, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_owned()),
                _ => Error::Io(e),
            })?;
        info!("created archive {}", path.display());
        let mut ar = Self::create_in(file, key, options)?;
        ar.path = Some(path.to_owned());
        Ok(ar)
    }

    /// Open an existing archive and check `key` against it.
    pub fn open<P: AsRef<Path>>(path: P, key: &Key, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound(format!("archive '{}'", path.display())),
                _ => Error::Io(e),
            })?;
        debug!("opened archive {}", path.display());
        let mut ar = Self::open_in(file, key, options)?;
        ar.path = Some(path.to_owned());
        Ok(ar)
    }
}

impl<S: Storage> Archive<S> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Start a fresh archive in `storage`, discarding its previous contents.
    pub fn create_in(mut storage: S, key: &Key, options: ArchiveOptions) -> Result<Self> {
        let options = options.validated();
        let cipher = BlockCipher::new(key, options.passes);
        storage.set_len(0)?;
        storage.seek(SeekFrom::Start(0))?;
        SelfCheck::new(key, &cipher).write(&mut storage)?;
        storage.flush()?;
        Ok(Self { storage, path: None, cipher, options })
    }

    /// Wrap an existing archive held in `storage`.  Fails with
    /// [`Error::KeyMismatch`] unless `key` is the archive's key.
    pub fn open_in(mut storage: S, key: &Key, options: ArchiveOptions) -> Result<Self> {
        let options = options.validated();
        let cipher = BlockCipher::new(key, options.passes);
        superblock::validate_key(&mut storage, key, &cipher)?;
        Ok(Self { storage, path: None, cipher, options })
    }

    /// Check a candidate key against this archive's self-check value.
    pub fn validate_key(&mut self, key: &Key) -> Result<()> {
        let cipher = BlockCipher::new(key, self.options.passes);
        superblock::validate_key(&mut self.storage, key, &cipher)
    }

    // ── Iteration ─────────────────────────────────────────────────────────────

    /// Walk the records from the start of the archive.
    ///
    /// Yields at most one error; a corrupt header or description ends the
    /// walk since nothing after it can be located.
    pub fn records(&mut self) -> RecordIter<'_, S> {
        RecordIter { archive: self, pos: SELF_CHECK_SIZE, index: 0, done: false }
    }

    pub fn entries(&mut self) -> Result<Vec<RecordEntry>> {
        self.records().collect()
    }

    pub fn count(&mut self) -> Result<usize> {
        let mut n = 0;
        for entry in self.records() {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    pub fn list(&mut self) -> Result<Vec<ListEntry>> {
        self.records().map(|r| r.map(|e| ListEntry::from(&e))).collect()
    }

    /// Locate record `index` and leave the cursor on its first payload byte.
    pub fn seek_to_record(&mut self, index: usize) -> Result<RecordEntry> {
        let found = self.records().find_map(|r| match r {
            Ok(e) if e.index == index => Some(Ok(e)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        });
        match found {
            Some(Ok(entry)) => {
                self.storage.seek(SeekFrom::Start(entry.payload_offset))?;
                Ok(entry)
            }
            Some(Err(e)) => Err(e),
            None => Err(Error::NotFound(format!("record {index}"))),
        }
    }

    fn read_entry_at(&mut self, pos: u64, index: usize) -> Result<Option<RecordEntry>> {
        let file_size = self.storage.len()?;
        if file_size < pos.saturating_add(MIN_HEADER_SIZE) {
            return Ok(None);
        }
        self.storage.seek(SeekFrom::Start(pos))?;
        let header = decode_header(&mut self.storage, &self.cipher, pos)?;
        let payload_offset = self.storage.stream_position()?;

        let available = file_size - payload_offset;
        if header.padded_payload_len() > available {
            return Err(Error::TruncatedOrForeign { stated: header.payload_length, available });
        }
        Ok(Some(RecordEntry { index, offset: pos, payload_offset, header }))
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Append a record at the end of the archive, streaming its payload from
    /// `source`.
    pub fn append<R: Read>(&mut self, description: &str, mut source: R) -> Result<RecordEntry> {
        let mut header = RecordHeader::new(description)?;
        let offset = self.storage.seek(SeekFrom::End(0))?;
        let index = self.count()?;

        if let Err(e) = self.stream_appended(offset, &mut header, &mut source) {
            warn!("append of '{}' failed, truncating back to {offset} B", header.description);
            self.storage.set_len(offset)?;
            return Err(e);
        }

        info!("appended record {index} '{}' ({} B)", header.description, header.payload_length);
        Ok(RecordEntry { index, offset, payload_offset: offset + header.header_bytes(), header })
    }

    /// Insert a record before record `index`, shifting it and every later
    /// record towards the end of the file.  `index == count` appends.
    pub fn insert<R: Read + Seek>(&mut self, index: usize, description: &str, mut source: R) -> Result<RecordEntry> {
        let mut at = None;
        let mut count = 0;
        for entry in self.records() {
            let entry = entry?;
            if entry.index == index {
                at = Some(entry.offset);
            }
            count += 1;
        }
        let offset = match at {
            Some(offset) => offset,
            None if index == count => return self.append(description, source),
            None => return Err(Error::NotFound(format!("record {index} (archive holds {count})"))),
        };

        let start = source.stream_position()?;
        let length = source.seek(SeekFrom::End(0))? - start;
        source.seek(SeekFrom::Start(start))?;

        let mut header = RecordHeader::new(description)?;
        header.payload_length = length;
        let file_size = self.storage.len()?;
        let span = signed(header.span())?;
        shift_range(&mut self.storage, span, offset, file_size, self.options.splice_chunk_size)?;

        if let Err(e) = self.stream_inserted(offset, &mut header, &mut source) {
            warn!("insert of '{}' failed, closing the gap at {offset}", header.description);
            let grown = file_size + header.span();
            shift_range(&mut self.storage, -span, offset + header.span(), grown, self.options.splice_chunk_size)?;
            return Err(e);
        }

        info!("inserted record {index} '{}' ({length} B)", header.description);
        Ok(RecordEntry { index, offset, payload_offset: offset + header.header_bytes(), header })
    }

    /// Remove record `index`.  Returns the removed record's entry.
    pub fn delete(&mut self, index: usize) -> Result<RecordEntry> {
        let entry = self.seek_to_record(index)?;
        let file_size = self.storage.len()?;
        if entry.end() >= file_size {
            self.storage.set_len(entry.offset)?;
        } else {
            shift_range(&mut self.storage, -signed(entry.span())?, entry.end(), file_size, self.options.splice_chunk_size)?;
        }
        self.storage.flush()?;
        info!("deleted record {index} '{}'", entry.header.description);
        Ok(entry)
    }

    /// Replace the description of record `index`, splicing the rest of the
    /// archive when the padded header size changes.
    pub fn rename(&mut self, index: usize, description: &str) -> Result<RecordEntry> {
        check_description(description)?;
        let entry = self.seek_to_record(index)?;
        let mut header = entry.header.clone();
        header.description = description.to_owned();

        let old_bytes = entry.header.header_bytes();
        let new_bytes = header.header_bytes();
        let file_size = self.storage.len()?;
        let was_last = entry.end() >= file_size;
        if old_bytes != new_bytes {
            let delta = signed(new_bytes)? - signed(old_bytes)?;
            shift_range(&mut self.storage, delta, entry.payload_offset, file_size, self.options.splice_chunk_size)?;
        }
        self.write_header_at(entry.offset, &header)?;
        // An empty trailing payload gives the splice nothing to move, so a
        // shrinking header must trim the file itself.
        if was_last {
            self.storage.set_len(entry.offset + header.span())?;
        }

        info!("renamed record {index} '{}' -> '{}'", entry.header.description, header.description);
        Ok(RecordEntry { index, offset: entry.offset, payload_offset: entry.offset + new_bytes, header })
    }

    // The final length and checksum are only known once the payload has
    // been streamed; the header is rewritten at the same size afterwards.
    fn stream_appended<R: Read>(&mut self, offset: u64, header: &mut RecordHeader, source: &mut R) -> Result<()> {
        self.storage.seek(SeekFrom::Start(offset))?;
        self.storage.write_all(&encode_header(header, &self.cipher)?)?;
        let summary = encode_payload(source, &mut self.storage, &self.cipher, self.options.io_buffer_size)?;
        header.payload_length = summary.length;
        header.payload_checksum = summary.checksum;
        self.write_header_at(offset, header)
    }

    // Fill a gap already opened for `header`; `payload_length` is fixed.
    fn stream_inserted<R: Read>(&mut self, offset: u64, header: &mut RecordHeader, source: &mut R) -> Result<()> {
        let length = header.payload_length;
        self.storage.seek(SeekFrom::Start(offset + header.header_bytes()))?;
        let mut limited = source.take(length);
        let summary = encode_payload(&mut limited, &mut self.storage, &self.cipher, self.options.io_buffer_size)?;
        if summary.length != length {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload source yielded {} of {length} bytes", summary.length),
            )));
        }
        header.payload_checksum = summary.checksum;
        self.write_header_at(offset, header)
    }

    fn write_header_at(&mut self, offset: u64, header: &RecordHeader) -> Result<()> {
        let bytes = encode_header(header, &self.cipher)?;
        self.storage.seek(SeekFrom::Start(offset))?;
        self.storage.write_all(&bytes)?;
        self.storage.flush()?;
        Ok(())
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Decrypt the payload of record `index` into `sink`.
    ///
    /// On a payload checksum mismatch every byte has still been written to
    /// `sink` before [`Error::PayloadChecksumMismatch`] is returned.
    pub fn read_payload<W: Write>(&mut self, index: usize, mut sink: W) -> Result<u64> {
        let entry = self.seek_to_record(index)?;
        self.decode_entry(&entry, &mut sink)?;
        Ok(entry.payload_length())
    }

    /// Check every payload checksum.  Returns the indices that failed.
    pub fn verify(&mut self) -> Result<Vec<usize>> {
        let mut failed = Vec::new();
        for entry in self.entries()? {
            self.storage.seek(SeekFrom::Start(entry.payload_offset))?;
            match self.decode_entry(&entry, &mut io::sink()) {
                Ok(()) => {}
                Err(Error::PayloadChecksumMismatch { .. }) => failed.push(entry.index),
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    fn decode_entry<W: Write + ?Sized>(&mut self, entry: &RecordEntry, sink: &mut W) -> Result<()> {
        let actual = decode_payload(
            &mut self.storage,
            sink,
            &self.cipher,
            entry.header.payload_length,
            self.options.io_buffer_size,
        )?;
        if actual != entry.header.payload_checksum {
            warn!("record {} '{}' failed its payload checksum", entry.index, entry.header.description);
            return Err(Error::PayloadChecksumMismatch { expected: entry.header.payload_checksum, actual });
        }
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn len(&mut self) -> Result<u64> {
        Ok(self.storage.len()?)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    pub fn into_inner(self) -> S {
        self.storage
    }
}

// ── RecordIter ────────────────────────────────────────────────────────────────

/// Lazy walk over an archive's records, returned by [`Archive::records`].
pub struct RecordIter<'a, S: Storage> {
    archive: &'a mut Archive<S>,
    pos:     u64,
    index:   usize,
    done:    bool,
}

impl<S: Storage> Iterator for RecordIter<'_, S> {
    type Item = Result<RecordEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.archive.read_entry_at(self.pos, self.index) {
            Ok(Some(entry)) => {
                self.pos = entry.end();
                self.index += 1;
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn signed(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| {
        Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds i64 range"))
    })
}
