//! CRC routines protecting the TouchComm v2 packet.
//!
//! Two checksums guard every packet: a 6-bit CRC embedded in the header
//! control byte, and a 16-bit CRC appended after the payload.

/// Polynomial x^6 + x + 1 for the header CRC (low six bits).
const CRC6_POLY: u8 = 0x03;

/// Polynomial x^16 + x^12 + x^5 + 1 for the payload CRC.
const CRC16_POLY: u16 = 0x1021;

/// Compute the 6-bit header CRC over the first `bits` bits of `data`,
/// MSB-first, initial state 0x3F.
///
/// The encoder runs this over the first 26 header bits and stores the
/// register state in the low six bits of byte 3. Shifting those 6 bits
/// through the register afterwards drains it, so running the CRC over
/// all 32 stored bits yields zero, which is the acceptance check
/// applied to every inbound packet.
pub fn crc6(data: &[u8], bits: usize) -> u8 {
    debug_assert!(bits <= data.len() * 8);

    let mut remainder: u8 = 0x3F;
    for i in 0..bits {
        let bit = (data[i / 8] >> (7 - (i % 8))) & 0x01;
        let feedback = ((remainder >> 5) & 0x01) ^ bit;
        remainder = (remainder << 1) & 0x3F;
        if feedback != 0 {
            remainder ^= CRC6_POLY;
        }
    }
    remainder
}

/// Compute the CRC-16/CCITT over `data`, seeded with `init`.
///
/// The transmitter seeds with 0xFFFF and appends the result big-endian;
/// the receiver recomputes over header+payload+trailer and accepts only
/// a zero residue.
pub fn crc16(data: &[u8], init: u16) -> u16 {
    let mut remainder = init;
    for &byte in data {
        remainder ^= (byte as u16) << 8;
        for _ in 0..8 {
            remainder = if remainder & 0x8000 != 0 {
                (remainder << 1) ^ CRC16_POLY
            } else {
                remainder << 1
            };
        }
    }
    remainder
}
