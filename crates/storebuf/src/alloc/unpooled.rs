// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::alloc::{Allocator, StoreConfig};
use crate::store::{SharedStore, StoreKind};
use crate::{Buffer, Error, Result};

/// Creates a fresh store for every buffer.
///
/// Suits long-lived buffers and low allocation volume. The store is freed when the buffer (and
/// every slice of it) is closed or dropped, so [`release()`][Allocator::release] simply drops
/// the buffer.
///
/// # Examples
///
/// ```
/// use storebuf::{Allocator, StoreConfig, UnpooledAllocator};
///
/// let allocator = UnpooledAllocator::new(StoreConfig::Native);
///
/// let mut buffer = allocator.allocate(16, 1024)?;
/// buffer.write_bytes(&[7; 100])?;
/// assert_eq!(buffer.capacity(), 128);
///
/// allocator.release(buffer)?;
/// # Ok::<(), storebuf::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct UnpooledAllocator {
    store: StoreConfig,
}

impl UnpooledAllocator {
    /// Creates an allocator for stores described by `store`.
    #[must_use]
    pub const fn new(store: StoreConfig) -> Self {
        Self { store }
    }

    /// The store configuration of this allocator.
    #[must_use]
    pub const fn store_config(&self) -> &StoreConfig {
        &self.store
    }
}

impl Allocator for UnpooledAllocator {
    fn store_kind(&self) -> StoreKind {
        self.store.kind()
    }

    fn allocate(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer> {
        if initial_capacity > max_capacity {
            return Err(Error::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds maximum capacity {max_capacity}"
            )));
        }

        let store = SharedStore::from_box(self.store.create(initial_capacity)?);
        Buffer::with_lease(store, initial_capacity, max_capacity, None)
    }

    fn release(&self, buffer: Buffer) -> Result<()> {
        if buffer.is_pooled() {
            event!(Level::WARN, "pooled buffer released into an unpooled allocator");
            return Err(Error::PoolMisuse(
                "buffer was acquired from a pool, not from this allocator".to_string(),
            ));
        }

        drop(buffer);
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::UNBOUNDED;
    use crate::alloc::PooledAllocator;

    assert_impl_all!(UnpooledAllocator: Send, Sync, Clone);

    #[test]
    fn every_allocation_gets_its_own_store() {
        let allocator = UnpooledAllocator::default();

        let first = allocator.allocate(16, UNBOUNDED).unwrap();
        let second = allocator.allocate(16, UNBOUNDED).unwrap();
        assert!(!first.store().ptr_eq(second.store()));
        assert_eq!(first.capacity(), 16);
        assert_eq!(first.limit(), 16);
        assert_eq!(first.position(), 0);
        assert!(!first.is_pooled());
    }

    #[test]
    fn dynamic_heap_buffer_grows_to_power_of_two() {
        let allocator = UnpooledAllocator::new(StoreConfig::Heap);
        let mut buffer = allocator.allocate(16, UNBOUNDED).unwrap();

        for i in 0..100_u8 {
            buffer.write_u8(i).unwrap();
        }

        assert_eq!(buffer.capacity(), 128);
        assert_eq!(buffer.position(), 100);
    }

    #[test]
    fn initial_above_max_is_rejected() {
        let allocator = UnpooledAllocator::default();
        assert!(matches!(allocator.allocate(32, 16), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn max_capacity_is_clamped_to_store_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = UnpooledAllocator::new(StoreConfig::Mapped {
            directory: dir.path().to_path_buf(),
        });

        let buffer = allocator.allocate(8, UNBOUNDED).unwrap();
        assert_eq!(buffer.kind(), StoreKind::Mapped);
        assert_eq!(buffer.max_capacity(), StoreKind::Mapped.max_size());
    }

    #[tracing_test::traced_test]
    #[test]
    fn pooled_buffer_is_rejected() {
        let pool = PooledAllocator::new(StoreConfig::Heap);
        let unpooled = UnpooledAllocator::default();

        let buffer = pool.allocate(8, 8).unwrap();
        assert!(matches!(unpooled.release(buffer), Err(Error::PoolMisuse(_))));
        assert!(logs_contain("pooled buffer released into an unpooled allocator"));

        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().retained, 1);
    }
}
