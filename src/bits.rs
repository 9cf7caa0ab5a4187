//! Bit-addressed reads from big-endian byte buffers.
//!
//! Bit 0 is the most-significant bit of the first byte. Every header and sub-byte telemetry
//! field in the crate is read through these functions.
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Policy for [extract_bits_as_int] when the requested bits are not within the carrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnOutOfRangeBits {
    /// Treat absent bits as zero.
    #[default]
    ReturnZero,
    /// Fail with [Error::BitRange].
    Error,
}

/// A run of bits, most-significant first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bits(Vec<bool>);

impl Bits {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().copied()
    }

    /// Big-endian unsigned value of these bits.
    ///
    /// # Errors
    /// [Error::BitRange] if there are more than 64 bits.
    pub fn to_uint(&self) -> Result<u64> {
        bits_to_uint(self)
    }
}

impl From<Vec<bool>> for Bits {
    fn from(bits: Vec<bool>) -> Self {
        Bits(bits)
    }
}

fn check_range(bytes: &[u8], start_bit: usize, num_bits: usize) -> Result<()> {
    let available = bytes.len() * 8;
    match start_bit.checked_add(num_bits) {
        Some(end) if end <= available => Ok(()),
        _ => Err(Error::BitRange {
            start: start_bit,
            len: num_bits,
            available,
        }),
    }
}

#[inline]
fn bit_at(bytes: &[u8], idx: usize) -> bool {
    (bytes[idx / 8] >> (7 - idx % 8)) & 0x1 == 1
}

/// Extract `num_bits` bits starting at `start_bit`.
///
/// # Errors
/// [Error::BitRange] if `start_bit + num_bits` exceeds the bits available in `bytes`.
pub fn extract_bits(bytes: &[u8], start_bit: usize, num_bits: usize) -> Result<Bits> {
    check_range(bytes, start_bit, num_bits)?;
    Ok(Bits(
        (start_bit..start_bit + num_bits)
            .map(|idx| bit_at(bytes, idx))
            .collect(),
    ))
}

/// Interpret `bits` as a big-endian unsigned integer.
///
/// # Errors
/// [Error::BitRange] if there are more than 64 bits.
pub fn bits_to_uint(bits: &Bits) -> Result<u64> {
    if bits.len() > 64 {
        return Err(Error::BitRange {
            start: 0,
            len: bits.len(),
            available: 64,
        });
    }
    Ok(bits
        .iter()
        .fold(0u64, |acc, bit| (acc << 1) | u64::from(bit)))
}

/// Extract `num_bits` starting at `start_bit` directly as an unsigned integer.
///
/// # Errors
/// [Error::BitRange] if the bits are not all within `bytes` or `num_bits > 64`.
pub fn extract_uint(bytes: &[u8], start_bit: usize, num_bits: usize) -> Result<u64> {
    if num_bits > 64 {
        return Err(Error::BitRange {
            start: start_bit,
            len: num_bits,
            available: 64,
        });
    }
    check_range(bytes, start_bit, num_bits)?;
    let mut value = 0u64;
    for idx in start_bit..start_bit + num_bits {
        value = (value << 1) | u64::from(bit_at(bytes, idx));
    }
    Ok(value)
}

/// Extract a bit field from an integer that has already been unpacked from its carrier
/// bytes. `carrier_bits` is the width the value was unpacked from (8 for a single byte)
/// and `bit` counts from the carrier's most-significant bit.
///
/// # Errors
/// [Error::BitRange] only when `policy` is [OnOutOfRangeBits::Error] and the field does
/// not fit within the carrier.
pub fn extract_bits_as_int(
    data: u64,
    carrier_bits: u32,
    bit: u32,
    length: u32,
    policy: OnOutOfRangeBits,
) -> Result<u64> {
    let fits = carrier_bits <= 64
        && bit
            .checked_add(length)
            .is_some_and(|end| end <= carrier_bits);
    if !fits {
        return match policy {
            OnOutOfRangeBits::ReturnZero => Ok(0),
            OnOutOfRangeBits::Error => Err(Error::BitRange {
                start: bit as usize,
                len: length as usize,
                available: carrier_bits as usize,
            }),
        };
    }
    if length == 0 {
        return Ok(0);
    }
    let shift = carrier_bits - bit - length;
    let mask = if length == 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    };
    Ok((data >> shift) & mask)
}
