// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::store::{Store, StoreKind, check_range, check_size};
use crate::{Error, Result};

/// A store backed by an in-process byte array.
///
/// Growing reallocates the array and copies the existing content. This is the only store kind
/// that exposes its bytes directly via [`Store::heap_array()`].
#[derive(Debug, Default)]
pub struct HeapStore {
    bytes: Vec<u8>,
    closed: bool,
}

impl HeapStore {
    /// Allocates a zero-filled store of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `size` exceeds [`StoreKind::max_size()`] for heap stores.
    pub fn new(size: usize) -> Result<Self> {
        check_size(StoreKind::Heap, size)?;

        Ok(Self {
            bytes: vec![0; size],
            closed: false,
        })
    }

    /// Wraps an existing byte array without copying it.
    #[must_use]
    pub fn wrap(bytes: Vec<u8>) -> Self {
        Self { bytes, closed: false }
    }

    /// Returns the backing byte array, consuming the store.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }
}

impl Store for HeapStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Heap
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, dst.len(), self.bytes.len())?;

        dst.copy_from_slice(&self.bytes[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, src.len(), self.bytes.len())?;

        self.bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.ensure_open()?;
        check_size(StoreKind::Heap, new_size)?;

        event!(Level::DEBUG, old_size = self.bytes.len(), new_size, "resizing heap store");

        self.bytes.resize(new_size, 0);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.bytes = Vec::new();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn heap_array(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn heap_array_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.bytes)
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        self.ensure_open()?;
        check_range(from, len, self.bytes.len())?;
        check_range(to, len, self.bytes.len())?;

        self.bytes.copy_within(from..from + len, to);
        Ok(())
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, len, self.bytes.len())?;

        self.bytes[offset..offset + len].fill(0);
        Ok(())
    }
}
