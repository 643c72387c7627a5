// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;

use crate::store::StoreKind;
use crate::{Buffer, Result};

/// Produces [`Buffer`]s over one store technology and takes them back when they are done.
///
/// Implementations are safe to share between threads. The buffers they return are not; each
/// buffer is used from one thread at a time.
///
/// # Resource management
///
/// Every buffer should end with [`release()`][Self::release], [`Buffer::close()`] or a drop.
/// A pooled buffer that is dropped returns to its pool on its own.
pub trait Allocator: Debug + Send + Sync {
    /// The store technology behind the buffers this allocator returns.
    fn store_kind(&self) -> StoreKind;

    /// Returns an empty buffer with `capacity == initial_capacity` that may grow up to
    /// `max_capacity`.
    ///
    /// # Errors
    ///
    /// Fails if `initial_capacity > max_capacity`, if the initial capacity exceeds the ceiling of
    /// the store technology or if the store cannot be created.
    fn allocate(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer>;

    /// Ends the use of a buffer obtained from this allocator.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::PoolMisuse`][crate::Error::PoolMisuse] if the buffer was not obtained
    /// from this allocator. The buffer is still disposed of properly in that case.
    fn release(&self, buffer: Buffer) -> Result<()>;
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn store_kind(&self) -> StoreKind {
        (*self).store_kind()
    }

    fn allocate(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer> {
        (*self).allocate(initial_capacity, max_capacity)
    }

    fn release(&self, buffer: Buffer) -> Result<()> {
        (*self).release(buffer)
    }
}
