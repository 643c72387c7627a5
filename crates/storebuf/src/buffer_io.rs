// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, Read, Write};

use crate::Buffer;

/// Reads the remaining bytes `[position, limit)`, advancing the position.
impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = buf.len().min(self.remaining());
        self.read_bytes(&mut buf[..to_read])?;
        Ok(to_read)
    }
}

/// Writes at the position, growing the buffer as needed.
///
/// A write that cannot fit even after growth is rejected as a whole rather than shortened.
impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(Self::flush(self)?)
    }
}
