// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::store::{Store, StoreKind, WeakStore};
use crate::{ByteOrder, Result};

/// Presents the opposite byte order of the wrapped store.
///
/// Only the encoding of numbers through [`StoreExt`][crate::store::StoreExt] is affected. Bytes
/// are addressed exactly as in the wrapped store.
#[derive(Debug)]
pub struct SwappedStore<S> {
    inner: S,
}

impl<S: Store> SwappedStore<S> {
    /// Wraps `inner`, flipping its byte order.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the wrapped store, restoring its own byte order.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Store> Store for SwappedStore<S> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn order(&self) -> ByteOrder {
        self.inner.order().swapped()
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.inner.read(offset, dst)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.inner.write(offset, src)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.inner.resize(new_size)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        self.inner.copy_within(from, to, len)
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        self.inner.zero(offset, len)
    }

    fn heap_array(&self) -> Option<&[u8]> {
        self.inner.heap_array()
    }

    fn heap_array_mut(&mut self) -> Option<&mut [u8]> {
        self.inner.heap_array_mut()
    }

    fn view_root(&self) -> Option<(&WeakStore, usize)> {
        self.inner.view_root()
    }
}
