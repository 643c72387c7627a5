// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use tracing::{Level, event};

use crate::store::{Store, StoreKind, check_range, check_size};
use crate::{Error, Result};

/// A store backed by memory obtained directly from the native allocator.
///
/// The memory is freed when the store is closed or dropped. Growing uses `realloc`, so the
/// content may move but is preserved.
#[derive(Debug)]
pub struct NativeStore {
    // Dangling while `size` is zero or the store is closed.
    ptr: NonNull<u8>,
    size: usize,
    closed: bool,
}

// SAFETY: The store exclusively owns its allocation; nothing else holds the pointer.
unsafe impl Send for NativeStore {}

impl NativeStore {
    /// Allocates a zero-filled store of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `size` exceeds [`StoreKind::max_size()`] for native stores.
    ///
    /// # Panics
    ///
    /// Aborts the process via [`alloc::handle_alloc_error()`] if the allocator is out of memory.
    pub fn new(size: usize) -> Result<Self> {
        check_size(StoreKind::Native, size)?;

        let ptr = if size == 0 {
            NonNull::dangling()
        } else {
            let layout = layout_of(size)?;

            // SAFETY: The layout has a non-zero size.
            let raw = unsafe { alloc::alloc_zeroed(layout) };
            NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };

        event!(Level::DEBUG, size, "allocated native store");

        Ok(Self { ptr, size, closed: false })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: The pointer is valid for `size` initialized bytes (all allocations are zeroed
        // or zero-extended) and is dangling but well-aligned when `size` is zero.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: As in `bytes()`, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    fn free(&mut self) {
        if self.size == 0 {
            return;
        }

        // The layout was valid when the block was allocated with this size.
        if let Ok(layout) = layout_of(self.size) {
            // SAFETY: The block was allocated by the global allocator with this layout and is not
            // referenced anywhere else.
            unsafe {
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }

        self.ptr = NonNull::dangling();
        self.size = 0;
    }
}

fn layout_of(size: usize) -> Result<Layout> {
    Layout::from_size_align(size, 1)
        .map_err(|e| Error::invalid_argument(format!("cannot allocate {size} native bytes: {e}")))
}

impl Store for NativeStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Native
    }

    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, dst.len(), self.size)?;

        dst.copy_from_slice(&self.bytes()[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, src.len(), self.size)?;

        self.bytes_mut()[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.ensure_open()?;
        check_size(StoreKind::Native, new_size)?;

        if new_size == self.size {
            return Ok(());
        }

        event!(Level::DEBUG, old_size = self.size, new_size, "resizing native store");

        if new_size == 0 {
            self.free();
            return Ok(());
        }

        if self.size == 0 {
            *self = Self::new(new_size)?;
            return Ok(());
        }

        let old_layout = layout_of(self.size)?;
        let new_layout = layout_of(new_size)?;

        // SAFETY: The block was allocated with `old_layout` and the new size is non-zero and
        // forms a valid layout with the same alignment.
        let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_size) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));

        let old_size = self.size;
        self.ptr = ptr;

        if new_size > old_size {
            let tail_ptr = ptr.as_ptr().wrapping_add(old_size);

            // SAFETY: The tail `[old_size, new_size)` lies within the new allocation and is not
            // yet initialized, so it is zeroed before being exposed through `size`.
            unsafe {
                tail_ptr.write_bytes(0, new_size - old_size);
            }
        }

        self.size = new_size;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            event!(Level::DEBUG, size = self.size, "freeing native store");
            self.free();
            self.closed = true;
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        self.ensure_open()?;
        check_range(from, len, self.size)?;
        check_range(to, len, self.size)?;

        self.bytes_mut().copy_within(from..from + len, to);
        Ok(())
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        self.ensure_open()?;
        check_range(offset, len, self.size)?;

        self.bytes_mut()[offset..offset + len].fill(0);
        Ok(())
    }
}

impl Drop for NativeStore {
    fn drop(&mut self) {
        self.free();
    }
}
