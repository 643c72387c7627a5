// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use nm::{Event, Magnitude};
use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::alloc::Lease;
use crate::store::{HeapStore, SharedStore, Store, StoreKind, check_range};
use crate::{ByteOrder, Error, Result, UNBOUNDED};

/// A cursor over a window of a [`Store`], with NIO-style navigation and automatic growth.
///
/// A buffer tracks a window `[offset, offset + capacity)` of its store and a cursor:
///
/// ```text
/// 0 <= mark <= position <= limit <= capacity <= max_capacity
/// ```
///
/// Relative operations (`read_*`, `write_*`) start at `position` and advance it by the encoded
/// width. Absolute operations (`*_at`) take an index relative to the window, are bounded by
/// `capacity` and leave the cursor untouched.
///
/// # Growth
///
/// A relative write that runs past `limit` while `limit == capacity` grows the buffer to the
/// smallest power of two that fits the write, capped at `max_capacity`. The store is resized to
/// match if it is too small. If the write does not fit even at `max_capacity`, it fails with
/// [`Error::CapacityExceeded`]. A relative write past a `limit` that was lowered below
/// `capacity` (e.g. by [`flip()`][Self::flip]) fails with [`Error::OutOfBounds`] instead.
///
/// Every failed operation leaves the cursor and the window unchanged. A store grown for a relative
/// write that then failed keeps its new size.
///
/// # Sharing
///
/// [`slice()`][Self::slice] and [`duplicate()`][Self::duplicate] create buffers that share the
/// store but have independent cursors. Bytes written through one are visible through the others.
/// The store is closed (or recycled) only once the last sharer is gone.
///
/// # Thread safety
///
/// A buffer may be moved to another thread but must not be mutated from multiple threads at the
/// same time; every method takes `&mut self` for cursor changes.
///
/// # Examples
///
/// ```
/// use storebuf::{Buffer, UNBOUNDED};
/// use storebuf::store::HeapStore;
///
/// let mut buffer = Buffer::new(HeapStore::new(16)?, 16, UNBOUNDED)?;
///
/// buffer.write_u32(0xCAFE_F00D)?;
/// buffer.write_string("hello")?;
/// buffer.flip();
///
/// assert_eq!(buffer.read_u32()?, 0xCAFE_F00D);
/// assert_eq!(buffer.read_string()?, "hello");
/// assert!(!buffer.has_remaining());
/// # Ok::<(), storebuf::Error>(())
/// ```
#[derive(Debug)]
pub struct Buffer {
    pub(crate) store: SharedStore,
    offset: usize,
    capacity: usize,
    max_capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    order: ByteOrder,
    read_only: bool,

    // Present while the buffer is on loan from a pooled allocator.
    lease: Option<Lease>,
}

impl Buffer {
    /// Creates a buffer over `store` with `initial_capacity` bytes accessible, able to grow up to
    /// `max_capacity` bytes.
    ///
    /// Pass [`UNBOUNDED`] as `max_capacity` to grow up to the ceiling of the store technology. The
    /// store is resized if it is smaller than `initial_capacity`.
    ///
    /// # Errors
    ///
    /// Fails if `initial_capacity > max_capacity`, if `initial_capacity` exceeds the ceiling of
    /// the store technology or if the store cannot be resized.
    pub fn new(
        store: impl Store + 'static,
        initial_capacity: usize,
        max_capacity: usize,
    ) -> Result<Self> {
        Self::from_shared(SharedStore::new(store), initial_capacity, max_capacity)
    }

    /// Creates a buffer over a store that may already be shared with other buffers.
    ///
    /// The window starts at the beginning of the store.
    ///
    /// # Errors
    ///
    /// As for [`new()`][Self::new].
    pub fn from_shared(
        store: SharedStore,
        initial_capacity: usize,
        max_capacity: usize,
    ) -> Result<Self> {
        Self::with_lease(store, initial_capacity, max_capacity, None)
    }

    /// Wraps an existing store as a fixed-capacity buffer covering all of it.
    #[must_use]
    pub fn wrap(store: impl Store + 'static) -> Self {
        let store = SharedStore::new(store);
        let size = store.size();
        Self::over_window(store, 0, size, size)
    }

    /// Wraps a byte array as a fixed-capacity buffer covering all of it.
    ///
    /// # Examples
    ///
    /// ```
    /// use storebuf::Buffer;
    ///
    /// let mut buffer = Buffer::wrap_vec(vec![0, 0, 0, 42]);
    /// assert_eq!(buffer.read_u32()?, 42);
    /// # Ok::<(), storebuf::Error>(())
    /// ```
    #[must_use]
    pub fn wrap_vec(bytes: Vec<u8>) -> Self {
        Self::wrap(HeapStore::wrap(bytes))
    }

    pub(crate) fn with_lease(
        store: SharedStore,
        initial_capacity: usize,
        max_capacity: usize,
        lease: Option<Lease>,
    ) -> Result<Self> {
        if initial_capacity > max_capacity {
            return Err(Error::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds maximum capacity {max_capacity}"
            )));
        }

        let ceiling = store.kind().max_size();
        if initial_capacity > ceiling {
            return Err(Error::invalid_argument(format!(
                "initial capacity {initial_capacity} exceeds the maximum size {ceiling} of a {kind} store",
                kind = store.kind()
            )));
        }

        {
            let mut guard = store.lock();
            if guard.size() < initial_capacity {
                guard.resize(initial_capacity)?;
            }
        }

        let mut buffer = Self::over_window(store, 0, initial_capacity, max_capacity.min(ceiling));
        buffer.lease = lease;
        Ok(buffer)
    }

    fn over_window(
        store: SharedStore,
        offset: usize,
        capacity: usize,
        max_capacity: usize,
    ) -> Self {
        Self {
            store,
            offset,
            capacity,
            max_capacity,
            position: 0,
            limit: capacity,
            mark: None,
            order: ByteOrder::default(),
            read_only: false,
            lease: None,
        }
    }

    /// The current read/write cursor, relative to the window.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor. A mark beyond the new position is discarded.
    ///
    /// # Errors
    ///
    /// Fails if `position > limit`.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::invalid_argument(format!(
                "position {position} exceeds limit {}",
                self.limit
            )));
        }

        self.position = position;
        if self.mark.is_some_and(|mark| mark > position) {
            self.mark = None;
        }

        Ok(())
    }

    /// The end of the readable (or writable, before growth) region.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Moves the limit. The position and mark are pulled back if they lie beyond it.
    ///
    /// # Errors
    ///
    /// Fails if `limit > capacity`.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity {
            return Err(Error::invalid_argument(format!(
                "limit {limit} exceeds capacity {}",
                self.capacity
            )));
        }

        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|mark| mark > limit) {
            self.mark = None;
        }

        Ok(())
    }

    /// The currently accessible size of the window.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The size the window may grow to.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// The start of the window within the store.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The saved position, if any.
    #[must_use]
    pub fn marked(&self) -> Option<usize> {
        self.mark
    }

    /// Number of bytes between the position and the limit.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Whether any bytes remain between the position and the limit.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// The byte order used to encode and decode numbers.
    #[must_use]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Changes the byte order used to encode and decode numbers. Stored bytes are not touched.
    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Returns the buffer with the given byte order.
    #[must_use]
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether writes through this buffer are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the buffer is on loan from a pooled allocator.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    /// The storage technology of the store.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.store.kind()
    }

    /// The store behind the buffer.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Prepares a just-written buffer for reading: the limit moves to the position and the
    /// position to zero.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    /// Resets the cursor to cover the whole window: position zero, limit at capacity.
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    /// Moves the position back to zero, keeping the limit.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// Saves the current position.
    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// Restores the position saved by [`mark()`][Self::mark]. The mark is kept.
    ///
    /// # Errors
    ///
    /// Fails if no mark is set.
    pub fn reset(&mut self) -> Result<&mut Self> {
        let mark = self.mark.ok_or_else(|| Error::invalid_argument("reset without a mark"))?;
        self.position = mark;
        Ok(self)
    }

    /// Advances the position by `count` bytes without reading them.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `count` bytes remain.
    pub fn skip(&mut self, count: usize) -> Result<&mut Self> {
        self.advance_within_limit(count)?;
        Ok(self)
    }

    /// Moves the remaining bytes `[position, limit)` to the start of the window, then positions
    /// the cursor after them with the limit at capacity, ready for more writes.
    ///
    /// The bytes are moved through a small fixed-size window, so compacting does not allocate in
    /// proportion to the amount of data.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is read-only or the store cannot be written.
    pub fn compact(&mut self) -> Result<&mut Self> {
        let remaining = self.remaining();
        self.copy_within(self.position, 0, remaining)?;

        self.position = remaining;
        self.limit = self.capacity;
        self.mark = None;
        Ok(self)
    }

    /// Moves `len` bytes from window index `from` to window index `to`. The ranges may overlap.
    /// The cursor is not changed.
    ///
    /// # Errors
    ///
    /// Fails if either range exceeds the capacity, the buffer is read-only or the store cannot
    /// be written.
    pub fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        self.ensure_writable()?;
        check_range(from, len, self.capacity)?;
        check_range(to, len, self.capacity)?;

        self.store.lock().copy_within(self.offset + from, self.offset + to, len)
    }

    /// Creates a fixed-capacity buffer over `[index, index + len)` of this buffer's window.
    ///
    /// The slice shares the store but has its own cursor, starting at position zero with the
    /// limit at `len`. Accesses through the slice can never reach outside its window.
    ///
    /// # Errors
    ///
    /// Fails if the range exceeds the capacity of this buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use storebuf::Buffer;
    ///
    /// let mut parent = Buffer::wrap_vec(vec![0; 16]);
    /// let mut slice = parent.slice(4, 8)?;
    ///
    /// slice.write_u16(0xABCD)?;
    /// assert_eq!(parent.read_u16_at(4)?, 0xABCD);
    /// assert_eq!(parent.position(), 0);
    /// # Ok::<(), storebuf::Error>(())
    /// ```
    pub fn slice(&self, index: usize, len: usize) -> Result<Self> {
        check_range(index, len, self.capacity)?;

        let mut slice = Self::over_window(self.store.clone(), self.offset + index, len, len);
        slice.order = self.order;
        slice.read_only = self.read_only;
        Ok(slice)
    }

    /// Creates a slice over the remaining bytes `[position, limit)`.
    #[must_use]
    pub fn slice_remaining(&self) -> Self {
        let mut slice = Self::over_window(
            self.store.clone(),
            self.offset + self.position,
            self.remaining(),
            self.remaining(),
        );
        slice.order = self.order;
        slice.read_only = self.read_only;
        slice
    }

    /// Creates a buffer over the same window and store with a copy of this buffer's cursor.
    ///
    /// The duplicate is never on loan from a pool, even if this buffer is.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            store: self.store.clone(),
            offset: self.offset,
            capacity: self.capacity,
            max_capacity: self.max_capacity,
            position: self.position,
            limit: self.limit,
            mark: self.mark,
            order: self.order,
            read_only: self.read_only,
            lease: None,
        }
    }

    /// Creates a duplicate that rejects every write.
    #[must_use]
    pub fn as_read_only(&self) -> Self {
        let mut duplicate = self.duplicate();
        duplicate.read_only = true;
        duplicate
    }

    /// Direct access to the window's bytes, for heap stores only.
    ///
    /// The store stays locked while the guard is alive, so do not call other methods of any
    /// buffer over the same store until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unsupported`] if the store has no backing byte array or the buffer is
    /// read-only.
    pub fn array(&self) -> Result<MappedMutexGuard<'_, [u8]>> {
        let kind = self.kind();
        if self.read_only {
            return Err(Error::unsupported(kind, "array access to a read-only buffer"));
        }

        let (start, end) = (self.offset, self.offset + self.capacity);

        MutexGuard::try_map(self.store.lock(), |store| {
            store.heap_array_mut().and_then(|array| array.get_mut(start..end))
        })
        .map_err(|_guard| Error::unsupported(kind, "array"))
    }

    /// Overwrites the whole window with zero bytes. The cursor is not changed.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is read-only or the store cannot be written.
    pub fn zero(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.store.lock().zero(self.offset, self.capacity)
    }

    /// Forces written bytes of a file-backed store to stable storage.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed or the sync fails.
    pub fn flush(&mut self) -> Result<()> {
        self.store.lock().flush()
    }

    /// Ends the use of the buffer.
    ///
    /// A pooled buffer is returned to its pool. Otherwise the store is closed if this buffer is
    /// its last owner; slices and duplicates leave a still-shared store open.
    ///
    /// # Errors
    ///
    /// Fails if closing the store fails.
    pub fn close(mut self) -> Result<()> {
        if let Some(lease) = self.lease.take() {
            lease.recycle(&self.store);
            return Ok(());
        }

        if self.store.is_sole_owner() {
            self.store.lock().close()?;
        }

        Ok(())
    }

    /// Closes the store and removes its file.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::PoolMisuse`] for a pooled buffer, whose store belongs to the pool, and
    /// with [`Error::Unsupported`] for stores that are not file-backed.
    pub fn delete(self) -> Result<()> {
        if self.lease.is_some() {
            return Err(Error::PoolMisuse("a pooled buffer cannot delete its store".to_string()));
        }

        self.store.lock().delete()
    }

    fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity.min(self.store.kind().max_size()).max(self.capacity);
        self
    }

    pub(crate) fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(Error::unsupported(self.kind(), "writing a read-only buffer"))
        } else {
            Ok(())
        }
    }

    /// Claims `len` bytes at the position for reading and advances past them.
    ///
    /// Returns the window index at which the claimed bytes start.
    pub(crate) fn advance_within_limit(&mut self, len: usize) -> Result<usize> {
        let start = self.position;
        check_range(start, len, self.limit)?;

        self.position = start + len;
        Ok(start)
    }

    /// Claims `len` bytes at the position, hands their start index to `write` and advances past
    /// them once `write` succeeds.
    ///
    /// If `write` fails, the position and window are left as they were. A store grown for the
    /// claim keeps its new size.
    pub(crate) fn write_reserved(
        &mut self,
        len: usize,
        write: impl FnOnce(&mut Self, usize) -> Result<()>,
    ) -> Result<()> {
        let (capacity, limit) = (self.capacity, self.limit);
        let start = self.reserve(len)?;

        if let Err(e) = write(self, start) {
            self.capacity = capacity;
            self.limit = limit;
            return Err(e);
        }

        self.position += len;
        Ok(())
    }

    /// Claims `len` bytes at the position for writing, growing the buffer if permitted.
    fn reserve(&mut self, len: usize) -> Result<usize> {
        self.ensure_writable()?;

        let start = self.position;
        let end = start.checked_add(len).ok_or(Error::CapacityExceeded {
            required: usize::MAX,
            max_capacity: self.max_capacity,
        })?;

        if end <= self.limit {
            return Ok(start);
        }

        if self.limit < self.capacity {
            return Err(Error::out_of_bounds(start, len, self.limit));
        }

        self.grow(end)?;
        Ok(start)
    }

    fn grow(&mut self, required: usize) -> Result<()> {
        if required > self.max_capacity {
            return Err(Error::CapacityExceeded {
                required,
                max_capacity: self.max_capacity,
            });
        }

        let new_capacity = required
            .checked_next_power_of_two()
            .unwrap_or(self.max_capacity)
            .min(self.max_capacity);

        let store_end = self.offset + new_capacity;

        {
            let mut store = self.store.lock();
            if store.size() < store_end {
                store.resize(store_end)?;
            }
        }

        self.capacity = new_capacity;
        self.limit = new_capacity;

        BUFFER_GROWN.with(|e| e.observe(new_capacity));

        Ok(())
    }

    /// Reads `dst.len()` bytes at window index `index`. Bounds are validated by the caller.
    pub(crate) fn load(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.store.lock().read(self.offset + index, dst)
    }

    /// Writes `src` at window index `index`. Bounds are validated by the caller.
    pub(crate) fn store_bytes(&self, index: usize, src: &[u8]) -> Result<()> {
        self.store.lock().write(self.offset + index, src)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.recycle(&self.store);
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::wrap_vec(Vec::new())
    }
}

/// Creates an unbounded heap buffer holding a copy of the bytes, positioned at zero.
impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Self::wrap_vec(value.to_vec()).with_max_capacity(UNBOUNDED)
    }
}

const CAPACITY_BUCKETS: &[Magnitude] = &[
    256, 1024, 4096, 16_384, 65_536, 262_144, 1_048_576, 4_194_304, 16_777_216,
];

thread_local! {
    static BUFFER_GROWN: Event = Event::builder()
        .name("storebuf_buffer_grown")
        .histogram(CAPACITY_BUCKETS)
        .build();
}
