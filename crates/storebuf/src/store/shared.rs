// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::store::{Store, StoreKind, StoreView, check_range};
use crate::{Error, Result};

type StoreCell = Mutex<Box<dyn Store>>;

/// Shared ownership of a [`Store`].
///
/// Buffers and their slices hold clones of the same `SharedStore`. The store is exclusively owned
/// by the set of clones - it is closed (or returned to a pool) only when the last owner lets go.
///
/// The store is guarded by a mutex so that a buffer may be moved to (and released on) another
/// thread. Concurrent mutation of one buffer from multiple threads is still not supported: the
/// lock only makes the store itself safe to reach from whichever thread currently owns it.
#[derive(Clone, Debug)]
pub struct SharedStore {
    cell: Arc<StoreCell>,
}

impl SharedStore {
    /// Takes ownership of a store.
    #[must_use]
    pub fn new(store: impl Store + 'static) -> Self {
        Self::from_box(Box::new(store))
    }

    /// Takes ownership of a boxed store.
    #[must_use]
    pub fn from_box(store: Box<dyn Store>) -> Self {
        Self {
            cell: Arc::new(Mutex::new(store)),
        }
    }

    /// Locks the store for direct access.
    ///
    /// Do not hold the guard while calling into a buffer over the same store.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Store>> {
        self.cell.lock()
    }

    /// The storage technology of the store.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.lock().kind()
    }

    /// The current size of the store.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().size()
    }

    /// Number of owners currently sharing the store.
    #[must_use]
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Whether this handle is the only owner of the store.
    #[must_use]
    pub fn is_sole_owner(&self) -> bool {
        self.owners() == 1
    }

    /// Whether a [`WeakStore`] or [`StoreView`] can still reach the store.
    #[must_use]
    pub fn has_weak_refs(&self) -> bool {
        Arc::weak_count(&self.cell) > 0
    }

    /// Whether two handles share the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Creates a non-owning reference to the store.
    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            cell: Arc::downgrade(&self.cell),
        }
    }

    /// Creates a view over `[offset, offset + len)` of this store.
    ///
    /// If this store is itself a view, the new view refers directly to the root store so that
    /// chains of views never form.
    ///
    /// # Errors
    ///
    /// Fails if the window is outside the current size of the store.
    pub fn view(&self, offset: usize, len: usize) -> Result<StoreView> {
        let store = self.lock();
        check_range(offset, len, store.size())?;

        if let Some((root, root_offset)) = store.view_root() {
            let offset = root_offset
                .checked_add(offset)
                .ok_or_else(|| Error::out_of_bounds(offset, len, usize::MAX))?;
            return Ok(StoreView::new(root.clone(), offset, len));
        }

        drop(store);
        Ok(StoreView::new(self.downgrade(), offset, len))
    }

    /// Attempts to take back exclusive ownership of the store.
    ///
    /// Returns the handle unchanged if other owners exist.
    ///
    /// # Errors
    ///
    /// Returns `self` if the store is still shared.
    pub fn try_unwrap(self) -> std::result::Result<Box<dyn Store>, Self> {
        Arc::try_unwrap(self.cell)
            .map(Mutex::into_inner)
            .map_err(|cell| Self { cell })
    }
}

/// A non-owning reference to a store owned by some [`SharedStore`].
#[derive(Clone, Debug)]
pub struct WeakStore {
    cell: Weak<StoreCell>,
}

impl WeakStore {
    /// Resolves the reference to its owner, if the owner is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedStore> {
        self.cell.upgrade().map(|cell| SharedStore { cell })
    }
}
