// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! We separate out all the write methods for ease of maintenance.

use num_traits::ToBytes;

use crate::buffer_get::STRING_PREFIX_WIDTH;
use crate::order::{MAX_NUM_WIDTH, MEDIUM_WIDTH, encoded_width};
use crate::store::{SCRATCH_SIZE, check_range};
use crate::{Buffer, Error, Result};

const MEDIUM_MIN: i32 = -(1 << 23);
const MEDIUM_MAX: i32 = (1 << 23) - 1;
const UNSIGNED_MEDIUM_MAX: u32 = (1 << 24) - 1;

macro_rules! write_numbers {
    ($($name:ident, $name_at:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Writes a `", stringify!($ty), "` at the position and advances past it.")]
            ///
            /// # Errors
            ///
            /// Fails if the buffer cannot grow to fit the value, is read-only or the store cannot
            /// be written.
            pub fn $name(&mut self, value: $ty) -> Result<()> {
                self.write_num(value)
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at window index `index`.")]
            ///
            /// # Errors
            ///
            /// Fails if the value does not fit before the capacity, the buffer is read-only or the
            /// store cannot be written.
            pub fn $name_at(&mut self, index: usize, value: $ty) -> Result<()> {
                self.write_num_at(index, value)
            }
        )*
    };
}

impl Buffer {
    /// Writes a number of type `T` at the position, in the buffer's byte order, growing the
    /// buffer if needed, and advances past it.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot grow to fit the number, is read-only or the store cannot be
    /// written.
    pub fn write_num<T: ToBytes>(&mut self, value: T) -> Result<()> {
        let width = encoded_width::<T>()?;
        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.order().encode(&value, window);

        self.write_bytes(window)
    }

    /// Writes a number of type `T` at window index `index`, in the buffer's byte order.
    ///
    /// # Errors
    ///
    /// Fails if the number does not fit before the capacity, the buffer is read-only or the
    /// store cannot be written.
    pub fn write_num_at<T: ToBytes>(&mut self, index: usize, value: T) -> Result<()> {
        let width = encoded_width::<T>()?;
        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.order().encode(&value, window);

        self.write_bytes_at(index, window)
    }

    write_numbers! {
        write_u8, write_u8_at => u8;
        write_i8, write_i8_at => i8;
        write_u16, write_u16_at => u16;
        write_i16, write_i16_at => i16;
        write_u32, write_u32_at => u32;
        write_i32, write_i32_at => i32;
        write_u64, write_u64_at => u64;
        write_i64, write_i64_at => i64;
        write_f32, write_f32_at => f32;
        write_f64, write_f64_at => f64;
    }

    /// Writes a boolean as one byte: 1 for `true`, 0 for `false`.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot grow, is read-only or the store cannot be written.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes a boolean as one byte at window index `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is not below the capacity, the buffer is read-only or the store cannot be
    /// written.
    pub fn write_bool_at(&mut self, index: usize, value: bool) -> Result<()> {
        self.write_u8_at(index, u8::from(value))
    }

    /// Writes a character as a single UTF-16 code unit.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] for characters outside the Basic Multilingual Plane,
    /// which need two code units. Otherwise as for [`write_u16()`][Self::write_u16].
    pub fn write_char(&mut self, value: char) -> Result<()> {
        self.write_u16(encode_char(value)?)
    }

    /// Writes a character as a single UTF-16 code unit at window index `index`.
    ///
    /// # Errors
    ///
    /// As for [`write_char()`][Self::write_char], bounded by the capacity.
    pub fn write_char_at(&mut self, index: usize, value: char) -> Result<()> {
        self.write_u16_at(index, encode_char(value)?)
    }

    /// Writes a signed 24-bit integer.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if `value` needs more than 24 bits. Otherwise fails
    /// if the buffer cannot grow, is read-only or the store cannot be written.
    pub fn write_medium(&mut self, value: i32) -> Result<()> {
        let bytes = self.encode_medium(signed_medium_bits(value)?);
        self.write_bytes(&bytes)
    }

    /// Writes a signed 24-bit integer at window index `index`.
    ///
    /// # Errors
    ///
    /// As for [`write_medium()`][Self::write_medium], bounded by the capacity.
    pub fn write_medium_at(&mut self, index: usize, value: i32) -> Result<()> {
        let bytes = self.encode_medium(signed_medium_bits(value)?);
        self.write_bytes_at(index, &bytes)
    }

    /// Writes an unsigned 24-bit integer.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if `value` needs more than 24 bits. Otherwise fails
    /// if the buffer cannot grow, is read-only or the store cannot be written.
    pub fn write_unsigned_medium(&mut self, value: u32) -> Result<()> {
        let bytes = self.encode_medium(unsigned_medium_bits(value)?);
        self.write_bytes(&bytes)
    }

    /// Writes an unsigned 24-bit integer at window index `index`.
    ///
    /// # Errors
    ///
    /// As for [`write_unsigned_medium()`][Self::write_unsigned_medium], bounded by the capacity.
    pub fn write_unsigned_medium_at(&mut self, index: usize, value: u32) -> Result<()> {
        let bytes = self.encode_medium(unsigned_medium_bits(value)?);
        self.write_bytes_at(index, &bytes)
    }

    /// Writes `src` at the position, growing the buffer if needed, and advances past it.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot grow to fit `src`, is read-only or the store cannot be written.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.write_reserved(src.len(), |buffer, start| buffer.store_bytes(start, src))
    }

    /// Writes `src` starting at window index `index`. Never grows the buffer.
    ///
    /// # Errors
    ///
    /// Fails if the range exceeds the capacity, the buffer is read-only or the store cannot be
    /// written.
    pub fn write_bytes_at(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        check_range(index, src.len(), self.capacity())?;
        self.store_bytes(index, src)
    }

    /// Writes a string as a `u32` byte length in the buffer's byte order followed by its UTF-8
    /// bytes.
    ///
    /// Room for the whole string is claimed before anything is written.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if the string is longer than `u32::MAX` bytes.
    /// Otherwise fails if the buffer cannot grow, is read-only or the store cannot be written.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|e| {
            Error::invalid_argument(format!("string of {} bytes is too long: {e}", value.len()))
        })?;

        let mut prefix = [0_u8; STRING_PREFIX_WIDTH];
        self.order().encode(&len, &mut prefix);

        self.write_reserved(STRING_PREFIX_WIDTH + value.len(), |buffer, start| {
            buffer.store_bytes(start, &prefix)?;
            buffer.store_bytes(start + STRING_PREFIX_WIDTH, value.as_bytes())
        })
    }

    /// Transfers the remaining bytes of `src` into this buffer, advancing both.
    ///
    /// The bytes move through a small fixed-size window, so `src` may share a store with this
    /// buffer. Returns the number of bytes transferred.
    ///
    /// # Errors
    ///
    /// Fails if this buffer cannot grow to fit the bytes, is read-only or either store fails.
    /// On failure neither cursor moves.
    pub fn write_buffer(&mut self, src: &mut Self) -> Result<usize> {
        let len = src.remaining();
        let src_start = src.position();

        self.write_reserved(len, |buffer, start| {
            let mut scratch = [0_u8; SCRATCH_SIZE];
            let mut done = 0;
            while done < len {
                let chunk = (len - done).min(SCRATCH_SIZE);
                let window = &mut scratch[..chunk];
                src.load(src_start + done, window)?;
                buffer.store_bytes(start + done, window)?;
                done += chunk;
            }

            src.advance_within_limit(len).map(|_| ())
        })?;

        Ok(len)
    }

    fn encode_medium(&self, bits: u32) -> [u8; MEDIUM_WIDTH] {
        let mut bytes = [0_u8; MEDIUM_WIDTH];
        self.order().encode_medium(bits, &mut bytes);
        bytes
    }
}

fn encode_char(value: char) -> Result<u16> {
    u16::try_from(u32::from(value)).map_err(|_overflow| {
        Error::invalid_argument(format!(
            "character {value:?} does not fit in a single UTF-16 code unit"
        ))
    })
}

fn signed_medium_bits(value: i32) -> Result<u32> {
    if !(MEDIUM_MIN..=MEDIUM_MAX).contains(&value) {
        return Err(Error::invalid_argument(format!(
            "{value} does not fit in a signed 24-bit integer"
        )));
    }

    Ok(value.cast_unsigned() & UNSIGNED_MEDIUM_MAX)
}

fn unsigned_medium_bits(value: u32) -> Result<u32> {
    if value > UNSIGNED_MEDIUM_MAX {
        return Err(Error::invalid_argument(format!(
            "{value} does not fit in an unsigned 24-bit integer"
        )));
    }

    Ok(value)
}
