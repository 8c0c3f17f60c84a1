//! Raw register to physical unit conversion.
//!
//! Every transport lands here eventually: the dongle and Modbus paths both
//! produce bare 16-bit register values, and the functions in this module are
//! the only place those turn into volts, hertz and kilowatt-hours.

use crate::registers::{BitWidth, RegisterField};

/// Little-endian u16 from a byte slice at `offset`.
pub fn u16ify(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Assemble a 32-bit quantity from a consecutive register pair, low word first.
pub fn u32_from_words(lo: u16, hi: u16) -> u32 {
    u32::from(lo) | (u32::from(hi) << 16)
}

/// Reinterpret a raw register value as two's-complement at its declared width.
pub fn as_signed(raw: u32, width: BitWidth) -> i32 {
    match width {
        BitWidth::Bits16 => i32::from(raw as u16 as i16),
        BitWidth::Bits32 => raw as i32,
    }
}

/// Scale a raw (possibly sign-reinterpreted) value into physical units.
///
/// Sign reinterpretation happens at the field's declared width before the
/// divide, so a 16-bit -5 does not come out as 6553.1.
pub fn apply_scale(raw: u32, field: &RegisterField) -> f64 {
    let magnitude = if field.signed {
        f64::from(as_signed(raw, field.bit_width))
    } else {
        f64::from(raw)
    };
    magnitude / field.scale
}

/// Round to one decimal, used for derived kWh sums.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterField;

    #[test]
    fn u16ify_is_little_endian() {
        assert_eq!(u16ify(&[0x34, 0x12], 0), 0x1234);
        assert_eq!(u16ify(&[0xff, 0x34, 0x12], 1), 0x1234);
    }

    #[test]
    fn word_pair_assembly() {
        assert_eq!(u32_from_words(0, 0), 0);
        assert_eq!(u32_from_words(0xffff, 0), 65535);
        assert_eq!(u32_from_words(0, 1), 65536);
        assert_eq!(u32_from_words(0xffff, 0xffff), u32::MAX);
        assert_eq!(u32_from_words(0x5678, 0x1234), 0x1234_5678);
    }

    #[test]
    fn signed_reinterpretation() {
        assert_eq!(as_signed(0xffff, BitWidth::Bits16), -1);
        assert_eq!(as_signed(0x8000, BitWidth::Bits16), -32768);
        assert_eq!(as_signed(0x7fff, BitWidth::Bits16), 32767);
        assert_eq!(as_signed(0xffff_ffff, BitWidth::Bits32), -1);
    }

    #[test]
    fn scale_divisors() {
        for (scale, expected) in [(1.0, 2500.0), (10.0, 250.0), (100.0, 25.0), (1000.0, 2.5)] {
            let field = RegisterField::u16(0, scale);
            assert_eq!(apply_scale(2500, &field), expected);
        }
    }

    #[test]
    fn signed_scale() {
        let field = RegisterField {
            address: 0,
            bit_width: BitWidth::Bits16,
            scale: 10.0,
            signed: true,
        };
        assert_eq!(apply_scale(0xffffu32 - 49, &field), -5.0);
    }
}
