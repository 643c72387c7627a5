// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use num_traits::{FromBytes, ToBytes};

use crate::{Error, Result};

/// Widest number representation that the encode/decode helpers accept, in bytes.
pub(crate) const MAX_NUM_WIDTH: usize = 16;

/// Width of a 24-bit "medium" integer, in bytes.
pub(crate) const MEDIUM_WIDTH: usize = 3;

/// The order in which the bytes of multi-byte numbers are laid out in storage.
///
/// Stores and buffers default to [`ByteOrder::BigEndian`]. The byte order only affects how
/// numbers are encoded and decoded - it never changes how bytes are addressed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Most significant byte first.
    #[default]
    BigEndian,

    /// Least significant byte first.
    LittleEndian,
}

impl ByteOrder {
    /// The byte order of the current platform.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }

    /// The opposite byte order.
    #[must_use]
    pub const fn swapped(self) -> Self {
        match self {
            Self::BigEndian => Self::LittleEndian,
            Self::LittleEndian => Self::BigEndian,
        }
    }

    /// Encodes `value` into `dst`, which must be exactly as wide as `T`'s byte representation.
    pub(crate) fn encode<T: ToBytes>(self, value: &T, dst: &mut [u8]) {
        let bytes = match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        };

        dst.copy_from_slice(bytes.as_ref());
    }

    /// Decodes a `T` from `src`, which must be exactly as wide as `T`'s byte representation.
    pub(crate) fn decode<T: FromBytes>(self, src: &[u8]) -> T
    where
        T::Bytes: Sized,
    {
        assert_eq!(src.len(), size_of::<T::Bytes>());

        let bytes_array_ptr = src.as_ptr().cast::<T::Bytes>();

        // SAFETY: We asserted that the slice is exactly as long as the byte representation, which
        // is an array of bytes and therefore has no alignment requirements.
        let bytes_array = unsafe { &*bytes_array_ptr };

        match self {
            Self::BigEndian => T::from_be_bytes(bytes_array),
            Self::LittleEndian => T::from_le_bytes(bytes_array),
        }
    }

    /// Encodes the low 24 bits of `value` into `dst`, which must be 3 bytes wide.
    pub(crate) fn encode_medium(self, value: u32, dst: &mut [u8]) {
        match self {
            Self::BigEndian => dst.copy_from_slice(&value.to_be_bytes()[1..]),
            Self::LittleEndian => dst.copy_from_slice(&value.to_le_bytes()[..MEDIUM_WIDTH]),
        }
    }

    /// Decodes an unsigned 24-bit value from `src`, which must be 3 bytes wide.
    pub(crate) fn decode_medium(self, src: &[u8]) -> u32 {
        match self {
            Self::BigEndian => u32::from_be_bytes([0, src[0], src[1], src[2]]),
            Self::LittleEndian => u32::from_le_bytes([src[0], src[1], src[2], 0]),
        }
    }
}

/// Width in bytes of the storage representation of `T` when decoding.
///
/// Fails for representations wider than the stack scratch space used by the number helpers.
pub(crate) fn num_width<T: FromBytes>() -> Result<usize>
where
    T::Bytes: Sized,
{
    check_width(size_of::<T::Bytes>())
}

/// Width in bytes of the storage representation of `T` when encoding.
pub(crate) fn encoded_width<T: ToBytes>() -> Result<usize> {
    check_width(size_of::<T::Bytes>())
}

fn check_width(width: usize) -> Result<usize> {
    if width > MAX_NUM_WIDTH {
        return Err(Error::invalid_argument(format!(
            "numbers wider than {MAX_NUM_WIDTH} bytes are not supported, got {width}"
        )));
    }

    Ok(width)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_big_endian() {
        assert_eq!(ByteOrder::default(), ByteOrder::BigEndian);
        assert_eq!(ByteOrder::BigEndian.swapped(), ByteOrder::LittleEndian);
        assert_eq!(ByteOrder::LittleEndian.swapped(), ByteOrder::BigEndian);
    }

    #[test]
    fn encode_lays_out_bytes_in_order() {
        let mut dst = [0_u8; 4];

        ByteOrder::BigEndian.encode(&0x0102_0304_u32, &mut dst);
        assert_eq!(dst, [1, 2, 3, 4]);

        ByteOrder::LittleEndian.encode(&0x0102_0304_u32, &mut dst);
        assert_eq!(dst, [4, 3, 2, 1]);
    }

    #[test]
    fn decode_reverses_encode() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let mut dst = [0_u8; 8];
            order.encode(&-1234.5_f64, &mut dst);
            assert_eq!(order.decode::<f64>(&dst).to_bits(), (-1234.5_f64).to_bits());

            let mut dst = [0_u8; 2];
            order.encode(&i16::MIN, &mut dst);
            assert_eq!(order.decode::<i16>(&dst), i16::MIN);
        }
    }

    #[test]
    fn native_matches_platform() {
        let mut dst = [0_u8; 2];
        ByteOrder::native().encode(&0x0102_u16, &mut dst);
        assert_eq!(dst, 0x0102_u16.to_ne_bytes());
    }

    #[test]
    fn medium_uses_three_bytes() {
        let mut dst = [0_u8; MEDIUM_WIDTH];

        ByteOrder::BigEndian.encode_medium(0x0012_3456, &mut dst);
        assert_eq!(dst, [0x12, 0x34, 0x56]);
        assert_eq!(ByteOrder::BigEndian.decode_medium(&dst), 0x0012_3456);

        ByteOrder::LittleEndian.encode_medium(0x0012_3456, &mut dst);
        assert_eq!(dst, [0x56, 0x34, 0x12]);
        assert_eq!(ByteOrder::LittleEndian.decode_medium(&dst), 0x0012_3456);
    }

    #[test]
    fn width_of_primitives() {
        assert_eq!(num_width::<u8>().unwrap(), 1);
        assert_eq!(num_width::<u128>().unwrap(), 16);
        assert_eq!(num_width::<f32>().unwrap(), 4);
        assert_eq!(encoded_width::<i64>().unwrap(), 8);
    }
}
