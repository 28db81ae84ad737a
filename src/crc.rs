//! FlexRay frame CRC-24.
//!
//! The register is 24 bits wide and bytes are shifted in MSB-first. The header
//! is processed before the payload, so `compute(h, p)` equals the checksum of
//! `h ‖ p` taken as one stream.

/// Generator polynomial (x^24 term implicit).
pub const CRC24_POLYNOMIAL: u32 = 0x5D_6DCB;
/// Register value before the first byte.
pub const CRC24_INIT: u32 = 0xFE_DCBA;
/// Mask that keeps the register at 24 bits.
pub const CRC24_MASK: u32 = 0xFF_FFFF;

const CRC24_TOP_BIT: u32 = 0x80_0000;

/// Precomputed register contribution of each possible top byte.
static CRC24_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = (index as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            crc = step(crc);
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

#[inline]
const fn step(crc: u32) -> u32 {
    if crc & CRC24_TOP_BIT != 0 {
        ((crc << 1) ^ CRC24_POLYNOMIAL) & CRC24_MASK
    } else {
        (crc << 1) & CRC24_MASK
    }
}

/// Streaming CRC-24 digest.
///
/// Lets the encoder checksum a header and payload that live in different
/// buffers without concatenating them first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc24 {
    register: u32,
}

impl Crc24 {
    pub const fn new() -> Self {
        Self { register: CRC24_INIT }
    }

    /// Feed bytes through the table-driven register update.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let index = ((self.register >> 16) as u8 ^ byte) as usize;
            self.register = ((self.register << 8) & CRC24_MASK) ^ CRC24_TABLE[index];
        }
    }

    /// Current 24-bit checksum. The digest can keep accepting bytes afterwards.
    pub const fn finish(&self) -> u32 {
        self.register
    }
}

impl Default for Crc24 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of `header` followed by `payload`.
pub fn compute(header: &[u8], payload: &[u8]) -> u32 {
    let mut digest = Crc24::new();
    digest.update(header);
    digest.update(payload);
    digest.finish()
}

/// Bit-serial reference form of [`compute`]. Always yields the same value.
pub fn compute_bitwise(header: &[u8], payload: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in header.iter().chain(payload) {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc = step(crc);
        }
    }
    crc
}

/// Split a checksum into its three trailer bytes, most significant first.
pub const fn to_trailer(crc: u32) -> [u8; 3] {
    [(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]
}

/// Reassemble a checksum from three trailer bytes.
pub fn from_trailer(trailer: [u8; 3]) -> u32 {
    (u32::from(trailer[0]) << 16) | (u32::from(trailer[1]) << 8) | u32::from(trailer[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_returns_init() {
        assert_eq!(compute(&[], &[]), CRC24_INIT);
        assert_eq!(compute_bitwise(&[], &[]), CRC24_INIT);
    }

    #[test]
    fn test_known_vector() {
        let header = [0x00, 0x0A, 0x01, 0x00];
        assert_eq!(compute(&header, &[0x01, 0x02, 0x03, 0x04]), 0x32_DCD9);
        assert_eq!(compute(&header, &[0x05, 0x06, 0x07, 0x08]), 0x2D_BB42);
    }

    #[test]
    fn test_table_matches_bitwise() {
        let header = [0x07, 0xFF, 0x3F, 0x3A, 0x00, 0x10];
        let payload: alloc::vec::Vec<u8> = (0..=255u8).collect();
        for len in [0usize, 1, 2, 7, 64, 254, 256] {
            let slice = &payload[..len];
            assert_eq!(compute(&header, slice), compute_bitwise(&header, slice));
        }
    }

    #[test]
    fn test_split_point_does_not_matter() {
        let stream = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let whole = compute(&stream, &[]);
        for split in 0..stream.len() {
            let (header, payload) = stream.split_at(split);
            assert_eq!(compute(header, payload), whole);
        }
    }

    #[test]
    fn test_single_byte_flip_changes_crc() {
        let header = [0x00, 0x64, 0x0A, 0x30, 0x00, 0x06];
        let payload = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        let baseline = compute(&header, &payload);
        for i in 0..payload.len() {
            let mut flipped = payload;
            flipped[i] ^= 0x01;
            assert_ne!(compute(&header, &flipped), baseline, "flip at byte {i}");
        }
    }

    #[test]
    fn test_result_fits_24_bits() {
        let payload = [0xFFu8; 254];
        assert!(compute(&[0xFF; 6], &payload) <= CRC24_MASK);
    }

    #[test]
    fn test_trailer_roundtrip() {
        let crc = 0x6C_36BB;
        assert_eq!(to_trailer(crc), [0x6C, 0x36, 0xBB]);
        assert_eq!(from_trailer(to_trailer(crc)), crc);
    }
}
