// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use nm::{Event, Magnitude};
use parking_lot::Mutex;
use tracing::{Level, event};

use crate::alloc::{Allocator, StoreConfig};
use crate::store::{SharedStore, StoreKind, check_size};
use crate::{Buffer, Error, Result};

/// Default number of retired stores kept per size class.
pub(crate) const DEFAULT_MAX_RETAINED_PER_CLASS: usize = 64;

// One size class per possible power of two.
const SIZE_CLASS_COUNT: usize = usize::BITS as usize + 1;

/// Reuses the stores of released buffers for later allocations of the same size class.
///
/// A size class is a power of two. A request for `n` bytes is served from the class of the
/// smallest power of two `>= n`, so the reused store always has room for at least `n` bytes. The
/// returned buffer has `capacity == n` regardless of how large the reused store is.
///
/// Clones share the same pool. The pool is safe to use from any number of threads at once.
///
/// # Reuse policy
///
/// The policy is fixed when the pool is built with [`PooledAllocator::builder()`].
///
/// With [`zero_on_reuse(true)`][PooledAllocatorBuilder::zero_on_reuse] (the default) every
/// recycled store is zeroed before it is handed to its next tenant, so no tenant can observe the
/// bytes of the previous one. Turning this off trades that guarantee for speed.
///
/// At most [`max_retained_per_class`][PooledAllocatorBuilder::max_retained_per_class] stores are
/// kept per class; surplus stores are dropped on release.
///
/// # Lifecycle
///
/// A buffer is returned to the pool by [`release()`][Allocator::release], by
/// [`Buffer::close()`] or by being dropped. A store that is still shared with slices or
/// duplicates of the buffer, or reachable through a [`StoreView`][crate::store::StoreView] or
/// [`WeakStore`][crate::store::WeakStore] taken from it, is not recycled; it is freed once the
/// last owner is gone. Buffers that are leaked (e.g. via [`std::mem::forget`]) stay visible in
/// [`PoolStats::outstanding`].
///
/// # Examples
///
/// ```
/// use storebuf::{Allocator, PooledAllocator, StoreConfig};
///
/// let pool = PooledAllocator::new(StoreConfig::Heap);
///
/// let mut first = pool.allocate(100, 100)?;
/// first.write_u64(42)?;
/// pool.release(first)?;
///
/// let second = pool.allocate(120, 120)?;
/// assert_eq!(second.position(), 0);
/// assert_eq!(pool.stats().reused, 1);
/// # Ok::<(), storebuf::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct PooledAllocator {
    inner: Arc<PoolInner>,
}

/// A snapshot of the counters of a [`PooledAllocator`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Buffers handed out and not yet returned.
    pub outstanding: usize,
    /// Retired stores waiting in the size class queues.
    pub retained: usize,
    /// Stores created because no retired store of the right class was available.
    pub created: u64,
    /// Allocations served from a retired store.
    pub reused: u64,
    /// Stores dropped instead of being retained.
    pub discarded: u64,
}

#[derive(Debug)]
struct PoolInner {
    store: StoreConfig,
    zero_on_reuse: bool,
    max_retained_per_class: usize,

    // Index `k` holds stores with `2^k <= size < 2^(k+1)`. A queued store is owned by the pool
    // alone; it is never referenced by a buffer at the same time.
    classes: Vec<Mutex<Vec<SharedStore>>>,

    outstanding: AtomicUsize,
    retained: AtomicUsize,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl PooledAllocator {
    /// Creates an empty pool for stores described by `store`, with the default policy.
    #[must_use]
    pub fn new(store: StoreConfig) -> Self {
        Self::builder(store).build()
    }

    /// Starts configuring a pool for stores described by `store`.
    ///
    /// # Examples
    ///
    /// ```
    /// use storebuf::{PooledAllocator, StoreConfig};
    ///
    /// let pool = PooledAllocator::builder(StoreConfig::Native)
    ///     .zero_on_reuse(false)
    ///     .max_retained_per_class(8)
    ///     .build();
    ///
    /// assert!(!pool.zero_on_reuse());
    /// assert_eq!(pool.max_retained_per_class(), 8);
    /// ```
    #[must_use]
    pub fn builder(store: StoreConfig) -> PooledAllocatorBuilder {
        PooledAllocatorBuilder {
            store,
            zero_on_reuse: true,
            max_retained_per_class: DEFAULT_MAX_RETAINED_PER_CLASS,
        }
    }

    /// Whether recycled stores are zeroed before reuse.
    #[must_use]
    pub fn zero_on_reuse(&self) -> bool {
        self.inner.zero_on_reuse
    }

    /// How many retired stores are kept per size class.
    #[must_use]
    pub fn max_retained_per_class(&self) -> usize {
        self.inner.max_retained_per_class
    }

    /// The store configuration of this pool.
    #[must_use]
    pub fn store_config(&self) -> &StoreConfig {
        &self.inner.store
    }

    /// Returns a buffer of `capacity == initial_capacity` that may grow up to `max_capacity`,
    /// reusing a retired store of the matching size class if one is available.
    ///
    /// The buffer is reset: position zero, limit at capacity, no mark.
    ///
    /// # Errors
    ///
    /// Fails if `initial_capacity > max_capacity`, if the capacity exceeds the ceiling of the
    /// store technology, if a new store cannot be created or a recycled one cannot be zeroed.
    pub fn acquire(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer> {
        if initial_capacity > max_capacity {
            return Err(Error::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds maximum capacity {max_capacity}"
            )));
        }

        let kind = self.inner.store.kind();
        check_size(kind, initial_capacity)?;

        ACQUIRED_SIZE.with(|e| e.observe(initial_capacity));

        let class = request_class(initial_capacity);
        let store = match self.pop(class) {
            Some(store) => self.prepare_for_reuse(store, class, initial_capacity)?,
            None => self.create(class, kind, initial_capacity)?,
        };
        let size = store.size();

        let lease = Lease {
            pool: Arc::clone(&self.inner),
        };
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);

        // The store is dropped with the failed buffer; account for it like any other discard.
        Buffer::with_lease(store, initial_capacity, max_capacity, Some(lease)).inspect_err(|_e| {
            self.inner.outstanding.fetch_sub(1, Ordering::Relaxed);
            self.inner.discard(size);
        })
    }

    /// Returns a buffer obtained from this pool.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::PoolMisuse`] if the buffer was not acquired from this pool. A buffer
    /// of another pool still returns to that pool when it is dropped here.
    pub fn release(&self, buffer: Buffer) -> Result<()> {
        let Some(lease) = buffer.lease() else {
            event!(Level::WARN, "unpooled buffer released into a pool");
            return Err(Error::PoolMisuse(
                "buffer was not acquired from a pool; slices and duplicates cannot be released"
                    .to_string(),
            ));
        };

        if !lease.belongs_to(&self.inner) {
            event!(Level::WARN, "buffer released into a pool other than its own");
            return Err(Error::PoolMisuse("buffer belongs to a different pool".to_string()));
        }

        buffer.close()
    }

    /// A snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.inner.outstanding.load(Ordering::Relaxed),
            retained: self.inner.retained.load(Ordering::Relaxed),
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Drops every retired store and returns how many were dropped.
    ///
    /// Buffers that are currently acquired are unaffected.
    pub fn shrink(&self) -> usize {
        let mut dropped = 0;

        for class in &self.inner.classes {
            let stores = std::mem::take(&mut *class.lock());
            dropped += stores.len();

            for store in stores {
                self.inner.discard(store.size());
            }
        }

        self.inner.retained.fetch_sub(dropped, Ordering::Relaxed);

        event!(Level::DEBUG, dropped, "shrunk pool");

        dropped
    }

    fn pop(&self, class: usize) -> Option<SharedStore> {
        let store = self.inner.classes.get(class)?.lock().pop()?;
        self.inner.retained.fetch_sub(1, Ordering::Relaxed);
        Some(store)
    }

    /// Makes a retired store fit for a request of `initial_capacity` bytes.
    ///
    /// A store that cannot be prepared is discarded.
    fn prepare_for_reuse(
        &self,
        store: SharedStore,
        class: usize,
        initial_capacity: usize,
    ) -> Result<SharedStore> {
        let prepared = {
            let mut guard = store.lock();

            // A tenant may have shrunk the store below its class through direct store access.
            let fitted = if guard.size() < initial_capacity {
                guard.resize(initial_capacity)
            } else {
                Ok(())
            };

            fitted.and_then(|()| {
                if self.inner.zero_on_reuse {
                    let size = guard.size();
                    guard.zero(0, size)
                } else {
                    Ok(())
                }
            })
        };

        if let Err(e) = prepared {
            self.inner.discard(store.size());
            return Err(e);
        }

        self.inner.reused.fetch_add(1, Ordering::Relaxed);
        REUSED.with(|e| e.observe(store.size()));

        event!(Level::TRACE, class, size = store.size(), "reusing retired store");

        Ok(store)
    }

    fn create(
        &self,
        class: usize,
        kind: StoreKind,
        initial_capacity: usize,
    ) -> Result<SharedStore> {
        // The class size may exceed the ceiling of the store kind; the request itself does not.
        let size = class_size(class).min(kind.max_size()).max(initial_capacity);
        let store = SharedStore::from_box(self.inner.store.create(size)?);

        self.inner.created.fetch_add(1, Ordering::Relaxed);
        CREATED.with(|e| e.observe(store.size()));

        event!(Level::TRACE, class, size = store.size(), "no retired store, created one");

        Ok(store)
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Allocator for PooledAllocator {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn store_kind(&self) -> StoreKind {
        self.inner.store.kind()
    }

    fn allocate(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer> {
        self.acquire(initial_capacity, max_capacity)
    }

    fn release(&self, buffer: Buffer) -> Result<()> {
        Self::release(self, buffer)
    }
}

/// Configures a [`PooledAllocator`] before it is built.
///
/// Created by [`PooledAllocator::builder()`].
#[derive(Clone, Debug)]
#[must_use]
pub struct PooledAllocatorBuilder {
    store: StoreConfig,
    zero_on_reuse: bool,
    max_retained_per_class: usize,
}

impl PooledAllocatorBuilder {
    /// Whether recycled stores are zeroed before reuse. Defaults to `true`.
    pub fn zero_on_reuse(mut self, zero_on_reuse: bool) -> Self {
        self.zero_on_reuse = zero_on_reuse;
        self
    }

    /// How many retired stores are kept per size class. Defaults to 64.
    pub fn max_retained_per_class(mut self, max_retained_per_class: usize) -> Self {
        self.max_retained_per_class = max_retained_per_class;
        self
    }

    /// Builds an empty pool with this policy.
    pub fn build(self) -> PooledAllocator {
        PooledAllocator {
            inner: Arc::new(PoolInner {
                store: self.store,
                zero_on_reuse: self.zero_on_reuse,
                max_retained_per_class: self.max_retained_per_class,
                classes: (0..SIZE_CLASS_COUNT).map(|_| Mutex::new(Vec::new())).collect(),
                outstanding: AtomicUsize::new(0),
                retained: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }
}

impl PoolInner {
    fn discard(&self, size: usize) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        DISCARDED.with(|e| e.observe(size));

        event!(Level::DEBUG, size, "discarding store");
    }
}

/// Ties a buffer to the pool it was acquired from.
///
/// A buffer holds at most one lease and gives it up exactly once, on close, release or drop.
#[derive(Debug)]
pub(crate) struct Lease {
    pool: Arc<PoolInner>,
}

impl Lease {
    fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Ends the lease, retaining `store` in the pool if nobody else can reach it.
    ///
    /// `store` is the handle of the departing buffer, which is dropped right after.
    pub(crate) fn recycle(self, store: &SharedStore) {
        let pool = self.pool;
        pool.outstanding.fetch_sub(1, Ordering::Relaxed);

        if !store.is_sole_owner() || store.has_weak_refs() {
            event!(Level::DEBUG, owners = store.owners(), "store still reachable, not recycling");
            pool.discard(store.size());
            return;
        }

        if store.lock().is_closed() {
            pool.discard(store.size());
            return;
        }

        let class = store_class(store.size());
        let retained = {
            let mut queue = pool.classes[class].lock();
            if queue.len() < pool.max_retained_per_class {
                queue.push(store.clone());
                true
            } else {
                false
            }
        };

        if retained {
            pool.retained.fetch_add(1, Ordering::Relaxed);
            event!(Level::TRACE, class, size = store.size(), "retired store");
        } else {
            pool.discard(store.size());
        }
    }
}

/// The class to look in for a store of at least `size` bytes.
fn request_class(size: usize) -> usize {
    size.checked_next_power_of_two()
        .map_or(usize::BITS, usize::trailing_zeros) as usize
}

/// The class a store of `size` bytes is retired into.
fn store_class(size: usize) -> usize {
    size.checked_ilog2().unwrap_or(0) as usize
}

fn class_size(class: usize) -> usize {
    u32::try_from(class)
        .ok()
        .and_then(|shift| 1_usize.checked_shl(shift))
        .unwrap_or(usize::MAX)
}

const SIZE_BUCKETS: &[Magnitude] = &[0, 64, 256, 1024, 4096, 16_384, 65_536, 1_048_576];

thread_local! {
    static ACQUIRED_SIZE: Event = Event::builder()
        .name("storebuf_pool_acquired_size")
        .histogram(SIZE_BUCKETS)
        .build();

    static REUSED: Event = Event::builder()
        .name("storebuf_pool_reused")
        .histogram(SIZE_BUCKETS)
        .build();

    static CREATED: Event = Event::builder()
        .name("storebuf_pool_created")
        .histogram(SIZE_BUCKETS)
        .build();

    static DISCARDED: Event = Event::builder()
        .name("storebuf_pool_discarded")
        .histogram(SIZE_BUCKETS)
        .build();
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::UNBOUNDED;
    use crate::store::Store;

    assert_impl_all!(PooledAllocator: Send, Sync, Clone);

    #[test]
    fn classes() {
        assert_eq!(request_class(0), 0);
        assert_eq!(request_class(1), 0);
        assert_eq!(request_class(100), 7);
        assert_eq!(request_class(128), 7);
        assert_eq!(request_class(usize::MAX), 64);

        assert_eq!(store_class(0), 0);
        assert_eq!(store_class(128), 7);
        assert_eq!(store_class(255), 7);

        assert_eq!(class_size(7), 128);
        assert_eq!(class_size(64), usize::MAX);
    }

    #[test]
    fn released_store_is_reused_with_reset_cursor() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let mut first = pool.acquire(100, UNBOUNDED).unwrap();
        first.write_bytes(&[0xAA; 50]).unwrap();
        first.set_order(crate::ByteOrder::LittleEndian);
        pool.release(first).unwrap();

        let second = pool.acquire(120, UNBOUNDED).unwrap();
        assert_eq!(second.store().size(), 128);
        assert_eq!(second.position(), 0);
        assert_eq!(second.capacity(), 120);
        assert_eq!(second.limit(), 120);
        assert_eq!(second.order(), crate::ByteOrder::BigEndian);
        assert!(second.is_pooled());

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.retained, 0);
    }

    #[test]
    fn reused_store_is_zeroed() {
        let pool = PooledAllocator::new(StoreConfig::Native);

        let mut first = pool.acquire(16, 16).unwrap();
        first.write_bytes(&[0xFF; 16]).unwrap();
        pool.release(first).unwrap();

        let mut second = pool.acquire(16, 16).unwrap();
        let mut bytes = [0xEE; 16];
        second.read_bytes(&mut bytes).unwrap();
        assert_eq!(bytes, [0; 16]);
    }

    #[test]
    fn zero_on_reuse_can_be_disabled() {
        let pool = PooledAllocator::builder(StoreConfig::Heap).zero_on_reuse(false).build();
        assert!(!pool.zero_on_reuse());

        let mut first = pool.acquire(4, 4).unwrap();
        first.write_u32(0xDEAD_BEEF).unwrap();
        pool.release(first).unwrap();

        let mut second = pool.acquire(4, 4).unwrap();
        assert_eq!(second.read_u32().unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn different_class_gets_a_new_store() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        pool.release(pool.acquire(16, 16).unwrap()).unwrap();
        let larger = pool.acquire(17, 17).unwrap();

        assert_eq!(larger.store().size(), 32);
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn drop_returns_buffer_to_pool() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        drop(pool.acquire(64, 64).unwrap());

        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn close_returns_buffer_to_pool() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        pool.acquire(64, 64).unwrap().close().unwrap();

        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn forgotten_buffer_stays_outstanding() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        std::mem::forget(pool.acquire(8, 8).unwrap());

        assert_eq!(pool.stats().outstanding, 1);
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn shared_store_is_not_recycled() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let buffer = pool.acquire(32, 32).unwrap();
        let slice = buffer.slice(0, 8).unwrap();
        pool.release(buffer).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.retained, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.outstanding, 0);

        let next = pool.acquire(32, 32).unwrap();
        assert!(!next.store().ptr_eq(slice.store()));
    }

    #[test]
    fn store_reachable_through_view_is_not_recycled() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let first = pool.acquire(64, 64).unwrap();
        let mut view = first.store().view(0, 64).unwrap();
        pool.release(first).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.retained, 0);
        assert_eq!(stats.discarded, 1);

        let mut second = pool.acquire(64, 64).unwrap();
        second.write_bytes(b"belongs to second").unwrap();
        assert_eq!(pool.stats().created, 2);

        let mut bytes = [0_u8; 4];
        assert!(matches!(view.read(0, &mut bytes), Err(Error::Closed)));
        assert!(matches!(view.write(0, b"XX"), Err(Error::Closed)));
    }

    #[test]
    fn store_reachable_through_weak_handle_is_not_recycled() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let first = pool.acquire(64, 64).unwrap();
        let weak = first.store().downgrade();
        pool.release(first).unwrap();

        assert!(weak.upgrade().is_none());
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn view_dropped_before_release_allows_recycling() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let first = pool.acquire(64, 64).unwrap();
        drop(first.store().view(0, 8).unwrap());
        pool.release(first).unwrap();

        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn shrunk_store_is_refitted_on_reuse() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let first = pool.acquire(1, 1).unwrap();
        first.store().lock().resize(0).unwrap();
        pool.release(first).unwrap();

        let second = pool.acquire(1, 1).unwrap();
        assert_eq!(second.capacity(), 1);
        assert_eq!(second.store().size(), 1);

        let stats = pool.stats();
        assert_eq!(stats.reused, 1);
        assert_eq!(
            stats.created,
            (stats.outstanding + stats.retained) as u64 + stats.discarded
        );
    }

    #[test]
    fn every_created_store_is_accounted_for() {
        let pool = PooledAllocator::builder(StoreConfig::Heap)
            .max_retained_per_class(1)
            .build();

        let a = pool.acquire(8, 8).unwrap();
        let b = pool.acquire(8, 8).unwrap();
        let c = pool.acquire(100, 100).unwrap();
        let slice = c.slice(0, 4).unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        pool.release(c).unwrap();
        let _held = pool.acquire(8, 8).unwrap();
        pool.acquire(usize::MAX, usize::MAX).unwrap_err();
        pool.acquire(9, 8).unwrap_err();
        drop(slice);

        let stats = pool.stats();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(
            stats.created,
            (stats.outstanding + stats.retained) as u64 + stats.discarded
        );
    }

    #[test]
    fn retention_is_bounded_per_class() {
        let pool = PooledAllocator::builder(StoreConfig::Heap)
            .max_retained_per_class(2)
            .build();
        assert_eq!(pool.max_retained_per_class(), 2);

        let buffers: Vec<_> = (0..5).map(|_| pool.acquire(8, 8).unwrap()).collect();
        for buffer in buffers {
            pool.release(buffer).unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created, 5);
        assert_eq!(stats.retained, 2);
        assert_eq!(stats.discarded, 3);
    }

    #[test]
    fn store_count_stays_bounded_under_reuse() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        for round in 0..1000_u32 {
            let mut buffer = pool.acquire(256, UNBOUNDED).unwrap();
            buffer.write_u32(round).unwrap();
            pool.release(buffer).unwrap();
        }

        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().reused, 999);
    }

    #[test]
    fn grown_buffer_retires_into_larger_class() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let mut buffer = pool.acquire(8, UNBOUNDED).unwrap();
        buffer.write_bytes(&[1; 100]).unwrap();
        assert_eq!(buffer.capacity(), 128);
        pool.release(buffer).unwrap();

        let reused = pool.acquire(128, 128).unwrap();
        assert_eq!(reused.store().size(), 128);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn shrink_drops_retained_stores() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let a = pool.acquire(8, 8).unwrap();
        let b = pool.acquire(1024, 1024).unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();

        assert_eq!(pool.shrink(), 2);
        let stats = pool.stats();
        assert_eq!(stats.retained, 0);
        assert_eq!(stats.discarded, 2);
        assert_eq!(pool.shrink(), 0);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        assert!(matches!(pool.acquire(16, 8), Err(Error::InvalidArgument(_))));
        assert!(matches!(pool.acquire(usize::MAX, usize::MAX), Err(Error::InvalidArgument(_))));
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn foreign_buffer_is_rejected() {
        let pool = PooledAllocator::new(StoreConfig::Heap);
        let other = PooledAllocator::new(StoreConfig::Heap);

        let buffer = other.acquire(8, 8).unwrap();
        assert!(matches!(pool.release(buffer), Err(Error::PoolMisuse(_))));
        assert!(logs_contain("buffer released into a pool other than its own"));

        assert_eq!(pool.stats().retained, 0);
        assert_eq!(other.stats().retained, 1);
        assert_eq!(other.stats().outstanding, 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn slice_is_rejected() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let buffer = pool.acquire(8, 8).unwrap();
        let slice = buffer.slice(0, 4).unwrap();
        assert!(matches!(pool.release(slice), Err(Error::PoolMisuse(_))));
        assert!(logs_contain("unpooled buffer released into a pool"));

        pool.release(buffer).unwrap();
        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn closed_store_is_discarded() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        let buffer = pool.acquire(8, 8).unwrap();
        buffer.store().lock().close().unwrap();
        pool.release(buffer).unwrap();

        assert_eq!(pool.stats().retained, 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn clones_share_the_pool() {
        let pool = PooledAllocator::default();
        let clone = pool.clone();

        pool.release(clone.acquire(8, 8).unwrap()).unwrap();
        assert_eq!(clone.stats().retained, 1);
    }

    #[test]
    fn concurrent_acquire_and_release() {
        let pool = PooledAllocator::new(StoreConfig::Heap);

        thread::scope(|scope| {
            for worker in 0..4_u64 {
                let pool = &pool;
                scope.spawn(move || {
                    for round in 0..250_u64 {
                        let mut buffer = pool.acquire(64, 64).unwrap();
                        assert_eq!(buffer.position(), 0);
                        buffer.write_u64(worker * 1000 + round).unwrap();
                        assert_eq!(buffer.read_u64_at(0).unwrap(), worker * 1000 + round);
                        pool.release(buffer).unwrap();
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert!(stats.created <= 4);
        assert_eq!(stats.created + stats.reused, 1000);
        assert_eq!(usize::try_from(stats.created).unwrap(), stats.retained);
    }

    #[test]
    fn mapped_pool_reuses_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = PooledAllocator::new(StoreConfig::Mapped {
            directory: dir.path().to_path_buf(),
        });

        let mut buffer = pool.acquire(1000, UNBOUNDED).unwrap();
        buffer.write_u64(7).unwrap();
        pool.release(buffer).unwrap();
        let buffer = pool.acquire(1000, UNBOUNDED).unwrap();
        assert_eq!(buffer.kind(), StoreKind::Mapped);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(buffer);
        pool.shrink();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
