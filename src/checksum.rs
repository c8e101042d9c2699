//! Streaming integrity checksums for record headers, descriptions and payloads.
//!
//! The accumulator can be folded chunk by chunk; splitting the input anywhere
//! gives the same result.  `finalize` is applied once, after the last chunk.

/// A foldable checksum with a fixed 32-bit output.
pub trait ChecksumAlgorithm {
    /// Accumulator value before any bytes are seen.
    const INIT: u32;

    fn update(acc: u32, bytes: &[u8]) -> u32;

    fn finalize(acc: u32) -> u32;

    /// One-shot checksum of `bytes`.
    fn digest(bytes: &[u8]) -> u32 {
        Self::finalize(Self::update(Self::INIT, bytes))
    }
}

/// IEEE CRC-32.  The canonical algorithm of the current record format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl ChecksumAlgorithm for Crc32 {
    const INIT: u32 = 0;

    fn update(acc: u32, bytes: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(acc);
        hasher.update(bytes);
        hasher.finalize()
    }

    // crc32fast already applies the final inversion on every finalize.
    fn finalize(acc: u32) -> u32 {
        acc
    }
}

/// Running checksum over a payload stream.
#[derive(Debug, Clone, Copy)]
pub struct Checksum {
    acc: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self { acc: Crc32::INIT }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.acc = Crc32::update(self.acc, bytes);
    }

    pub fn finalize(self) -> u32 {
        Crc32::finalize(self.acc)
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum with the canonical algorithm.
pub fn checksum(bytes: &[u8]) -> u32 {
    Crc32::digest(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        // Standard CRC-32 check value.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn single_bit_flip_detected() {
        let data = b"archive record payload".to_vec();
        let base = checksum(&data);
        for i in 0..data.len() * 8 {
            let mut flipped = data.clone();
            flipped[i / 8] ^= 1 << (i % 8);
            assert_ne!(checksum(&flipped), base);
        }
    }

    proptest! {
        #[test]
        fn chunking_does_not_matter(data in proptest::collection::vec(any::<u8>(), 0..2048), split in 0usize..2048) {
            let split = split.min(data.len());
            let mut running = Checksum::new();
            running.update(&data[..split]);
            running.update(&data[split..]);
            prop_assert_eq!(running.finalize(), checksum(&data));
        }
    }
}
