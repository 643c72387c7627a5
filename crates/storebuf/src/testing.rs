// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test helpers.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::store::{HeapStore, Store, StoreKind};
use crate::{Error, IoOperation, Result};

/// A heap store that reports when it is closed and can be made to reject writes.
#[derive(Debug)]
pub(crate) struct TrackedStore {
    inner: HeapStore,
    closed: Arc<AtomicBool>,
    failing_writes: bool,
}

impl TrackedStore {
    /// Returns the store and a flag that turns `true` once the store is closed.
    pub(crate) fn new(size: usize) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let store = Self {
            inner: HeapStore::new(size).unwrap(),
            closed: Arc::clone(&closed),
            failing_writes: false,
        };

        (store, closed)
    }

    /// Makes every write fail with an I/O error. Resizing still succeeds.
    pub(crate) fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }
}

impl Store for TrackedStore {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.inner.read(offset, dst)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if self.failing_writes {
            return Err(Error::io(IoOperation::Write, io::Error::other("injected write failure")));
        }

        self.inner.write(offset, src)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.inner.resize(new_size)
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
