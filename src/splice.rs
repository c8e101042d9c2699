//! In-place file splicing.
//!
//! [`shift_range`] moves the interval `[start, end)` of a file by a signed
//! offset using one bounded buffer.  Positive offsets open a gap before
//! `start` (insertion); negative offsets close a gap (deletion):
//!
//! ```text
//!             start              end          EOF
//!   |..........|----|----|----|---|............|
//!                              \   /
//!                            chunk_size
//! ```
//!
//! Positive shifts walk chunks from `end` backwards and negative shifts walk
//! forward from `start`, so no chunk is overwritten before it has been read.
//!
//! Not safe for concurrent use of the same file.

use std::io::{self, Seek, SeekFrom, Write};

use log::debug;

use crate::storage::Storage;

/// Default splice buffer: 16 MiB.
pub const DEFAULT_SPLICE_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Shift the bytes in `[start, end)` by `offset`.
///
/// - No-op when `start` is at or past end of file, `end` is zero, the range
///   is empty or `offset` is zero.
/// - When a negative shift would carry `start` before byte 0, `start` is
///   moved up by `-offset`; the bytes it skips are dropped.
/// - `end` is clamped to the file size.
/// - A negative shift whose range reaches end of file truncates the file to
///   its new length.
///
/// Afterwards the cursor is at `start` for a positive shift and at the
/// shifted end of the range for a negative one.
pub fn shift_range<S: Storage + ?Sized>(
    storage:    &mut S,
    offset:     i64,
    start:      u64,
    end:        u64,
    chunk_size: usize,
) -> io::Result<()> {
    let file_size = storage.len()?;
    if start >= file_size || end == 0 || end <= start || offset == 0 {
        return Ok(());
    }

    let back = offset.unsigned_abs();
    let start = if offset < 0 && start < back { start + back } else { start };
    let end = end.min(file_size);

    debug!("shift [{start}, {end}) by {offset} (file {file_size} B)");

    if start < end {
        let len = end - start;
        let chunk = (chunk_size.max(1) as u64).min(len);
        let mut buf = vec![0u8; chunk as usize];

        for i in 0..len / chunk {
            let pos = if offset > 0 { end - chunk * (i + 1) } else { start + chunk * i };
            move_chunk(storage, &mut buf, pos, offset)?;
        }

        let tail = (len % chunk) as usize;
        if tail > 0 {
            let pos = if offset > 0 { start } else { end - tail as u64 };
            move_chunk(storage, &mut buf[..tail], pos, offset)?;
        }
    }

    if offset < 0 && end == file_size {
        storage.set_len(file_size.saturating_sub(back))?;
    }
    storage.flush()?;

    let cursor = if offset > 0 { start } else { end.saturating_sub(back) };
    storage.seek(SeekFrom::Start(cursor))?;
    Ok(())
}

fn move_chunk<S: Storage + ?Sized>(
    storage: &mut S,
    buf:     &mut [u8],
    pos:     u64,
    offset:  i64,
) -> io::Result<()> {
    let dest = pos.checked_add_signed(offset).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "splice destination out of range")
    })?;
    storage.seek(SeekFrom::Start(pos))?;
    storage.read_exact(buf)?;
    storage.seek(SeekFrom::Start(dest))?;
    storage.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn file(len: usize) -> Cursor<Vec<u8>> {
        Cursor::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    #[test]
    fn positive_shift_opens_gap() {
        let mut f = file(100);
        let orig = f.get_ref().clone();
        shift_range(&mut f, 10, 20, 100, 7).unwrap();
        let out = f.get_ref();
        assert_eq!(out.len(), 110);
        assert_eq!(out[..20], orig[..20]);
        assert_eq!(out[30..], orig[20..]);
        assert_eq!(f.position(), 20);
    }

    #[test]
    fn negative_shift_to_eof_truncates() {
        let mut f = file(100);
        let orig = f.get_ref().clone();
        shift_range(&mut f, -16, 48, 100, 5).unwrap();
        let out = f.get_ref();
        assert_eq!(out.len(), 84);
        assert_eq!(out[..32], orig[..32]);
        assert_eq!(out[32..], orig[48..]);
        assert_eq!(f.position(), 84);
    }

    #[test]
    fn negative_shift_inside_file_keeps_length() {
        let mut f = file(64);
        let orig = f.get_ref().clone();
        shift_range(&mut f, -8, 16, 32, 1024).unwrap();
        let out = f.get_ref();
        assert_eq!(out.len(), 64);
        assert_eq!(out[8..24], orig[16..32]);
        assert_eq!(out[32..], orig[32..]);
        assert_eq!(f.position(), 24);
    }

    #[test]
    fn degenerate_calls_do_nothing() {
        let mut f = file(32);
        let orig = f.get_ref().clone();
        shift_range(&mut f, 0, 0, 32, 8).unwrap();
        shift_range(&mut f, 4, 32, 40, 8).unwrap();
        shift_range(&mut f, 4, 0, 0, 8).unwrap();
        shift_range(&mut f, -4, 10, 10, 8).unwrap();
        assert_eq!(*f.get_ref(), orig);
    }

    #[test]
    fn end_is_clamped_to_file_size() {
        let mut f = file(40);
        let orig = f.get_ref().clone();
        shift_range(&mut f, 8, 0, 1000, 16).unwrap();
        assert_eq!(f.get_ref().len(), 48);
        assert_eq!(f.get_ref()[8..], orig[..]);
    }

    #[test]
    fn bytes_moved_before_zero_are_dropped() {
        let mut f = file(50);
        let orig = f.get_ref().clone();
        shift_range(&mut f, -20, 0, 50, 6).unwrap();
        assert_eq!(*f.get_ref(), orig[20..].to_vec());
    }

    #[test]
    fn underflowing_start_moves_up_by_offset() {
        let mut f = file(50);
        let orig = f.get_ref().clone();
        shift_range(&mut f, -20, 5, 50, 6).unwrap();
        let out = f.get_ref();
        assert_eq!(out.len(), 30);
        assert_eq!(out[..5], orig[..5]);
        assert_eq!(out[5..], orig[25..]);
        assert_eq!(f.position(), 30);
    }

    proptest! {
        #[test]
        fn inverse_shift_restores_content(
            len in 1usize..600,
            x0_frac in 0.0f64..1.0,
            d in 1u64..300,
            chunk in 1usize..128,
        ) {
            let mut f = file(len);
            let orig = f.get_ref().clone();
            let x1 = len as u64;
            let x0 = ((len as f64) * x0_frac) as u64 % x1;

            shift_range(&mut f, d as i64, x0, x1, chunk).unwrap();
            prop_assert_eq!(f.get_ref().len() as u64, x1 + d);
            shift_range(&mut f, -(d as i64), x0 + d, x1 + d, chunk).unwrap();
            prop_assert_eq!(f.get_ref(), &orig);
        }
    }
}
