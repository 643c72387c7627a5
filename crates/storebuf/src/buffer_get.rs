// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! We separate out all the read methods for ease of maintenance.

use num_traits::FromBytes;

use crate::order::{MAX_NUM_WIDTH, MEDIUM_WIDTH, num_width};
use crate::store::check_range;
use crate::{Buffer, Error, Result};

/// Width of the length prefix of strings.
pub(crate) const STRING_PREFIX_WIDTH: usize = 4;

macro_rules! read_numbers {
    ($($name:ident, $name_at:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Reads a `", stringify!($ty), "` at the position and advances past it.")]
            ///
            /// # Errors
            ///
            /// Fails if the value does not fit before the limit or the store cannot be read.
            pub fn $name(&mut self) -> Result<$ty> {
                self.read_num()
            }

            #[doc = concat!("Reads a `", stringify!($ty), "` at window index `index`.")]
            ///
            /// # Errors
            ///
            /// Fails if the value does not fit before the capacity or the store cannot be read.
            pub fn $name_at(&self, index: usize) -> Result<$ty> {
                self.read_num_at(index)
            }
        )*
    };
}

impl Buffer {
    /// Reads a number of type `T` at the position, in the buffer's byte order, and advances past
    /// it.
    ///
    /// # Errors
    ///
    /// Fails if the number does not fit before the limit or the store cannot be read.
    pub fn read_num<T: FromBytes>(&mut self) -> Result<T>
    where
        T::Bytes: Sized,
    {
        let order = self.order();
        self.read_with(num_width::<T>()?, |bytes| Ok(order.decode(bytes)))
    }

    /// Reads a number of type `T` at window index `index`, in the buffer's byte order.
    ///
    /// # Errors
    ///
    /// Fails if the number does not fit before the capacity or the store cannot be read.
    pub fn read_num_at<T: FromBytes>(&self, index: usize) -> Result<T>
    where
        T::Bytes: Sized,
    {
        let order = self.order();
        self.read_at_with(index, num_width::<T>()?, |bytes| Ok(order.decode(bytes)))
    }

    read_numbers! {
        read_u8, read_u8_at => u8;
        read_i8, read_i8_at => i8;
        read_u16, read_u16_at => u16;
        read_i16, read_i16_at => i16;
        read_u32, read_u32_at => u32;
        read_i32, read_i32_at => i32;
        read_u64, read_u64_at => u64;
        read_i64, read_i64_at => i64;
        read_f32, read_f32_at => f32;
        read_f64, read_f64_at => f64;
    }

    /// Reads a boolean stored as one byte; any non-zero byte is `true`.
    ///
    /// # Errors
    ///
    /// Fails if no byte remains or the store cannot be read.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a boolean stored as one byte at window index `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is not below the capacity or the store cannot be read.
    pub fn read_bool_at(&self, index: usize) -> Result<bool> {
        Ok(self.read_u8_at(index)? != 0)
    }

    /// Reads a character stored as a single UTF-16 code unit.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidData`] if the code unit is a lone surrogate, or if fewer than
    /// two bytes remain or the store cannot be read.
    pub fn read_char(&mut self) -> Result<char> {
        let order = self.order();
        self.read_with(2, |bytes| decode_char(order.decode(bytes)))
    }

    /// Reads a character stored as a single UTF-16 code unit at window index `index`.
    ///
    /// # Errors
    ///
    /// As for [`read_char()`][Self::read_char], bounded by the capacity.
    pub fn read_char_at(&self, index: usize) -> Result<char> {
        let order = self.order();
        self.read_at_with(index, 2, |bytes| decode_char(order.decode(bytes)))
    }

    /// Reads a signed 24-bit integer.
    ///
    /// # Errors
    ///
    /// Fails if fewer than three bytes remain or the store cannot be read.
    pub fn read_medium(&mut self) -> Result<i32> {
        let order = self.order();
        self.read_with(MEDIUM_WIDTH, |bytes| Ok(sign_extend_medium(order.decode_medium(bytes))))
    }

    /// Reads a signed 24-bit integer at window index `index`.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit before the capacity or the store cannot be read.
    pub fn read_medium_at(&self, index: usize) -> Result<i32> {
        let order = self.order();
        self.read_at_with(index, MEDIUM_WIDTH, |bytes| {
            Ok(sign_extend_medium(order.decode_medium(bytes)))
        })
    }

    /// Reads an unsigned 24-bit integer.
    ///
    /// # Errors
    ///
    /// Fails if fewer than three bytes remain or the store cannot be read.
    pub fn read_unsigned_medium(&mut self) -> Result<u32> {
        let order = self.order();
        self.read_with(MEDIUM_WIDTH, |bytes| Ok(order.decode_medium(bytes)))
    }

    /// Reads an unsigned 24-bit integer at window index `index`.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit before the capacity or the store cannot be read.
    pub fn read_unsigned_medium_at(&self, index: usize) -> Result<u32> {
        let order = self.order();
        self.read_at_with(index, MEDIUM_WIDTH, |bytes| Ok(order.decode_medium(bytes)))
    }

    /// Fills `dst` with the bytes at the position and advances past them.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `dst.len()` bytes remain or the store cannot be read.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let start = self.position();
        check_range(start, dst.len(), self.limit())?;

        self.load(start, dst)?;
        self.advance_within_limit(dst.len())?;
        Ok(())
    }

    /// Fills `dst` with the bytes starting at window index `index`.
    ///
    /// # Errors
    ///
    /// Fails if the range exceeds the capacity or the store cannot be read.
    pub fn read_bytes_at(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        check_range(index, dst.len(), self.capacity())?;
        self.load(index, dst)
    }

    /// Reads `len` bytes at the position into a new vector and advances past them.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `len` bytes remain or the store cannot be read.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        check_range(self.position(), len, self.limit())?;

        let mut bytes = vec![0; len];
        self.read_bytes(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads a string written by [`write_string()`][Self::write_string]: a `u32` byte length in
    /// the buffer's byte order followed by that many bytes of UTF-8.
    ///
    /// On failure the position is left where it was.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidData`] if the bytes are not valid UTF-8, or if the string does
    /// not fit before the limit or the store cannot be read.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.position();
        let len = usize::try_from(self.read_u32_at_limit(start)?).map_err(|e| {
            Error::InvalidData(format!("string length does not fit in memory: {e}"))
        })?;

        let body = start + STRING_PREFIX_WIDTH;
        check_range(body, len, self.limit())?;

        let mut bytes = vec![0; len];
        self.load(body, &mut bytes)?;

        let value = String::from_utf8(bytes)
            .map_err(|e| Error::InvalidData(format!("string is not valid UTF-8: {e}")))?;

        self.advance_within_limit(STRING_PREFIX_WIDTH + len)?;
        Ok(value)
    }

    /// Reads the `u32` at window index `index` as long as it lies before the limit.
    fn read_u32_at_limit(&self, index: usize) -> Result<u32> {
        check_range(index, STRING_PREFIX_WIDTH, self.limit())?;
        self.read_u32_at(index)
    }

    /// Decodes `width` bytes at the position and advances past them once decoding succeeded.
    fn read_with<T>(&mut self, width: usize, decode: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        debug_assert!(width <= MAX_NUM_WIDTH);

        let start = self.position();
        check_range(start, width, self.limit())?;

        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.load(start, window)?;

        let value = decode(window)?;
        self.advance_within_limit(width)?;
        Ok(value)
    }

    /// Decodes `width` bytes at window index `index`.
    fn read_at_with<T>(
        &self,
        index: usize,
        width: usize,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        debug_assert!(width <= MAX_NUM_WIDTH);

        check_range(index, width, self.capacity())?;

        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.load(index, window)?;

        decode(window)
    }
}

fn decode_char(unit: u16) -> Result<char> {
    char::from_u32(u32::from(unit)).ok_or_else(|| {
        Error::InvalidData(format!("UTF-16 code unit {unit:#06x} is a lone surrogate"))
    })
}

fn sign_extend_medium(value: u32) -> i32 {
    (value << 8).cast_signed() >> 8
}
