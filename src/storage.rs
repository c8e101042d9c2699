//! Byte-range storage the archive core runs on.
//!
//! Anything seekable that can also be resized works: real files for the
//! CLI, in-memory cursors for tests and embedding.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

pub trait Storage: Read + Write + Seek {
    /// Truncate or extend the underlying bytes to exactly `len`.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Current total length.  The cursor position is preserved.
    fn len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if pos != end {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(end)
    }

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Storage for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.flush()?;
        File::set_len(self, len)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds address space"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }
}

/// Read until `buf` is full or the source is exhausted.  Returns bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
