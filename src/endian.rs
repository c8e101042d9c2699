//! Host to disk byte order for fixed-width integer fields.
//!
//! Every integer in the format is big-endian on disk.  Opaque bytes
//! (descriptions, payloads, nonces) are never normalized.

use byteorder::{BigEndian, ByteOrder};

/// Byte order of every integer field on disk.
pub type DiskOrder = BigEndian;

pub fn to_disk_u64(values: &[u64], out: &mut [u8]) {
    DiskOrder::write_u64_into(values, out);
}

pub fn from_disk_u64(bytes: &[u8], values: &mut [u64]) {
    DiskOrder::read_u64_into(bytes, values);
}

pub fn to_disk_u32(values: &[u32], out: &mut [u8]) {
    DiskOrder::write_u32_into(values, out);
}

pub fn from_disk_u32(bytes: &[u8], values: &mut [u32]) {
    DiskOrder::read_u32_into(bytes, values);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_fields_are_big_endian() {
        let mut out = [0u8; 16];
        to_disk_u64(&[1, 0x0102_0304_0506_0708], &mut out);
        assert_eq!(out[..8], [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(out[8..], [1, 2, 3, 4, 5, 6, 7, 8]);

        let mut back = [0u64; 2];
        from_disk_u64(&out, &mut back);
        assert_eq!(back, [1, 0x0102_0304_0506_0708]);
    }

    #[test]
    fn u32_fields_are_big_endian() {
        let mut out = [0u8; 8];
        to_disk_u32(&[0xDEAD_BEEF, 7], &mut out);
        assert_eq!(out, [0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 7]);

        let mut back = [0u32; 2];
        from_disk_u32(&out, &mut back);
        assert_eq!(back, [0xDEAD_BEEF, 7]);
    }
}
