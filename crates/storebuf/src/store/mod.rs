// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Backing stores: addressable byte ranges `[0, size)` with a single storage technology each.

mod file;
mod heap;
mod mapped;
mod native;
mod shared;
mod swapped;
mod view;

use std::fmt::{self, Debug};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub use file::FileStore;
pub use heap::HeapStore;
pub use mapped::MappedStore;
pub use native::NativeStore;
use num_traits::{FromBytes, ToBytes};
pub use shared::{SharedStore, WeakStore};
pub use swapped::SwappedStore;
use tracing::{Level, event};
pub use view::StoreView;

use crate::order::{MAX_NUM_WIDTH, encoded_width, num_width};
use crate::{ByteOrder, Error, Result};

/// Largest size of a heap, native or file store.
pub const MAX_STORE_SIZE: usize = isize::MAX.unsigned_abs();

/// Largest size of a single memory mapping.
///
/// This is `i32::MAX`. The mapped file itself may be larger; this only bounds the mapped window.
pub const MAX_MAPPED_SIZE: usize = 0x7FFF_FFFF;

/// Size of the stack scratch window used when moving or clearing bytes through the store interface.
pub(crate) const SCRATCH_SIZE: usize = 4096;

/// The storage technology behind a [`Store`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum StoreKind {
    /// An in-process byte array.
    Heap,
    /// Memory obtained directly from the native allocator and freed explicitly on close.
    Native,
    /// A window of a file mapped into the process address space.
    Mapped,
    /// A file accessed through seek-then-read/write calls.
    File,
}

impl StoreKind {
    /// The largest size a store of this kind can have.
    #[must_use]
    pub const fn max_size(self) -> usize {
        match self {
            Self::Heap | Self::Native | Self::File => MAX_STORE_SIZE,
            Self::Mapped => MAX_MAPPED_SIZE,
        }
    }

    /// Whether the store keeps its bytes in a file.
    #[must_use]
    pub const fn is_file_backed(self) -> bool {
        matches!(self, Self::Mapped | Self::File)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heap => "heap",
            Self::Native => "native",
            Self::Mapped => "mapped",
            Self::File => "file",
        };

        f.write_str(name)
    }
}

/// How a file-backed store may access its file.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MapMode {
    /// Bytes may be read and written. The file is created if absent.
    #[default]
    ReadWrite,

    /// Bytes may only be read. The file must already exist.
    ReadOnly,
}

impl MapMode {
    /// Whether writes are permitted.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// An addressable byte range `[0, size)` backed by one storage technology.
///
/// Every access at `offset` with length `n` requires `offset + n <= size`; a violation is
/// reported as [`Error::OutOfBounds`] before anything is touched. The raw byte operations take
/// `&mut self` because some technologies (e.g. [`FileStore`]) track a file pointer.
///
/// Numbers are read and written through [`StoreExt`], which encodes them in [`order()`].
///
/// A store is exclusively owned by one [`SharedStore`] (and through it by the buffers that share
/// it). Stores are not required to be thread-safe beyond being [`Send`].
///
/// [`order()`]: Store::order
pub trait Store: Debug + Send {
    /// The storage technology of the store.
    fn kind(&self) -> StoreKind;

    /// The current addressable length of the store.
    fn size(&self) -> usize;

    /// The byte order used by the [`StoreExt`] number helpers.
    fn order(&self) -> ByteOrder {
        ByteOrder::BigEndian
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Errors
    ///
    /// Fails if the range is out of bounds, the store is closed or the underlying I/O fails.
    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copies `src` into the store starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the range is out of bounds, the store is closed or read-only, or the
    /// underlying I/O fails.
    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()>;

    /// Changes the addressable length of the store, preserving existing content up to the
    /// smaller of the old and new sizes. Bytes gained by growing read as zero.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` exceeds the ceiling of the technology, if the technology refuses the
    /// change (file stores never shrink) or if the underlying I/O fails.
    fn resize(&mut self, new_size: usize) -> Result<()>;

    /// Forces written bytes to stable storage. Returns only after the bytes are durable.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed or the underlying I/O fails.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases the resources of the store. Later accesses fail with [`Error::Closed`].
    ///
    /// Closing an already closed store does nothing.
    ///
    /// # Errors
    ///
    /// Fails if releasing the underlying resource fails.
    fn close(&mut self) -> Result<()>;

    /// Whether [`close()`][Store::close] has been called.
    fn is_closed(&self) -> bool;

    /// Closes the store and removes its file from the filesystem.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unsupported`] for stores that are not file-backed.
    fn delete(&mut self) -> Result<()> {
        Err(Error::unsupported(self.kind(), "delete"))
    }

    /// The backing byte array, for heap stores only.
    fn heap_array(&self) -> Option<&[u8]> {
        None
    }

    /// The backing byte array, for heap stores only.
    fn heap_array_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    /// If this store is a view over another store, the root store and the offset of the view
    /// within it. Used to flatten chains of views.
    fn view_root(&self) -> Option<(&WeakStore, usize)> {
        None
    }

    /// Moves the bytes `[from, from + len)` to `[to, to + len)`. The ranges may overlap.
    ///
    /// The default implementation copies through a fixed-size stack window so that the transient
    /// memory use does not depend on `len`.
    ///
    /// # Errors
    ///
    /// Fails if either range is out of bounds or the underlying I/O fails.
    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        check_range(from, len, self.size())?;
        check_range(to, len, self.size())?;

        if from == to || len == 0 {
            return Ok(());
        }

        let mut scratch = [0_u8; SCRATCH_SIZE];

        if to < from {
            // Moving towards the front, so copy front-to-back to not clobber unread source bytes.
            let mut done = 0;
            while done < len {
                let chunk = (len - done).min(SCRATCH_SIZE);
                let window = &mut scratch[..chunk];
                self.read(from + done, window)?;
                self.write(to + done, window)?;
                done += chunk;
            }
        } else {
            let mut remaining = len;
            while remaining > 0 {
                let chunk = remaining.min(SCRATCH_SIZE);
                remaining -= chunk;
                let window = &mut scratch[..chunk];
                self.read(from + remaining, window)?;
                self.write(to + remaining, window)?;
            }
        }

        Ok(())
    }

    /// Sets the bytes `[offset, offset + len)` to zero.
    ///
    /// # Errors
    ///
    /// Fails if the range is out of bounds or the underlying I/O fails.
    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        check_range(offset, len, self.size())?;

        let zeros = [0_u8; SCRATCH_SIZE];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(SCRATCH_SIZE);
            self.write(offset + done, &zeros[..chunk])?;
            done += chunk;
        }

        Ok(())
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn kind(&self) -> StoreKind {
        (**self).kind()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn order(&self) -> ByteOrder {
        (**self).order()
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        (**self).read(offset, dst)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        (**self).write(offset, src)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        (**self).resize(new_size)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn delete(&mut self) -> Result<()> {
        (**self).delete()
    }

    fn heap_array(&self) -> Option<&[u8]> {
        (**self).heap_array()
    }

    fn heap_array_mut(&mut self) -> Option<&mut [u8]> {
        (**self).heap_array_mut()
    }

    fn view_root(&self) -> Option<(&WeakStore, usize)> {
        (**self).view_root()
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        (**self).copy_within(from, to, len)
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        (**self).zero(offset, len)
    }
}

/// Number helpers available on every [`Store`], encoding in the store's [`Store::order()`].
pub trait StoreExt: Store {
    /// Reads a number of type `T` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the number does not fit between `offset` and the end of the store, or if the
    /// underlying I/O fails.
    fn get_num<T: FromBytes>(&mut self, offset: usize) -> Result<T>
    where
        T::Bytes: Sized,
    {
        let width = num_width::<T>()?;
        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.read(offset, window)?;
        Ok(self.order().decode(window))
    }

    /// Writes a number of type `T` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the number does not fit between `offset` and the end of the store, or if the
    /// underlying I/O fails.
    fn put_num<T: ToBytes>(&mut self, offset: usize, value: T) -> Result<()> {
        let width = encoded_width::<T>()?;
        let mut scratch = [0_u8; MAX_NUM_WIDTH];
        let window = &mut scratch[..width];
        self.order().encode(&value, window);
        self.write(offset, window)
    }

    /// Reads a single byte at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of bounds or the underlying I/O fails.
    fn get_byte(&mut self, offset: usize) -> Result<u8> {
        let mut byte = [0_u8; 1];
        self.read(offset, &mut byte)?;
        Ok(byte[0])
    }

    /// Writes a single byte at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is out of bounds or the underlying I/O fails.
    fn put_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write(offset, &[value])
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Validates that `[offset, offset + len)` lies within `[0, bound)`.
pub(crate) fn check_range(offset: usize, len: usize, bound: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= bound => Ok(()),
        _ => Err(Error::out_of_bounds(offset, len, bound)),
    }
}

/// Validates a requested store size against the ceiling of its technology.
pub(crate) fn check_size(kind: StoreKind, size: usize) -> Result<()> {
    if size > kind.max_size() {
        return Err(Error::invalid_argument(format!(
            "size {size} exceeds the maximum size {} of a {kind} store",
            kind.max_size()
        )));
    }

    Ok(())
}

/// Removes the file of a scratch store that is being dropped. Failures are logged, not raised.
pub(crate) fn remove_scratch_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => event!(Level::DEBUG, path = %path.display(), "removed scratch file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => event!(
            Level::WARN,
            path = %path.display(),
            error = %e,
            "failed to remove scratch file"
        ),
    }
}

/// Rounds `size` up to the next power of two, saturating at the ceiling of `kind`.
pub(crate) fn round_to_pow2(kind: StoreKind, size: usize) -> Result<usize> {
    check_size(kind, size)?;

    Ok(size.checked_next_power_of_two().unwrap_or(kind.max_size()).min(kind.max_size()))
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_range_accepts_exact_fit() {
        check_range(0, 0, 0).unwrap();
        check_range(4, 4, 8).unwrap();
        check_range(8, 0, 8).unwrap();
    }

    #[test]
    fn check_range_rejects_overflowing_access() {
        assert!(matches!(
            check_range(5, 4, 8),
            Err(Error::OutOfBounds {
                offset: 5,
                length: 4,
                bound: 8
            })
        ));
        assert!(matches!(check_range(usize::MAX, 2, 8), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn rounding_to_pow2() {
        assert_eq!(round_to_pow2(StoreKind::Heap, 0).unwrap(), 1);
        assert_eq!(round_to_pow2(StoreKind::Heap, 100).unwrap(), 128);
        assert_eq!(round_to_pow2(StoreKind::Heap, 128).unwrap(), 128);
        assert_eq!(round_to_pow2(StoreKind::Mapped, MAX_MAPPED_SIZE).unwrap(), MAX_MAPPED_SIZE);
        round_to_pow2(StoreKind::Mapped, MAX_MAPPED_SIZE + 1).unwrap_err();
    }

    #[test]
    fn kind_ceilings() {
        assert_eq!(StoreKind::Mapped.max_size(), MAX_MAPPED_SIZE);
        assert_eq!(StoreKind::Heap.max_size(), MAX_STORE_SIZE);
        assert!(StoreKind::File.is_file_backed());
        assert!(!StoreKind::Native.is_file_backed());
        assert_eq!(StoreKind::Native.to_string(), "native");
    }

    #[test]
    fn default_copy_within_handles_overlap_in_both_directions() {
        // Use a file-less store that does not override copy_within to exercise the default.
        let mut store = SwappedStore::new(HeapStore::new(3 * SCRATCH_SIZE).unwrap());

        let pattern: Vec<u8> = (0..3 * SCRATCH_SIZE).map(|i| u8::try_from(i % 251).unwrap()).collect();
        store.write(0, &pattern).unwrap();

        // Backwards move with overlap larger than the scratch window.
        store.copy_within(100, 0, 2 * SCRATCH_SIZE).unwrap();
        let mut moved = vec![0_u8; 2 * SCRATCH_SIZE];
        store.read(0, &mut moved).unwrap();
        assert_eq!(moved.as_slice(), &pattern[100..100 + 2 * SCRATCH_SIZE]);

        // Forwards move with overlap.
        store.write(0, &pattern).unwrap();
        store.copy_within(0, 100, 2 * SCRATCH_SIZE).unwrap();
        store.read(100, &mut moved).unwrap();
        assert_eq!(moved.as_slice(), &pattern[..2 * SCRATCH_SIZE]);
    }

    #[test]
    fn store_ext_numbers_follow_store_order() {
        let mut store = HeapStore::new(8).unwrap();
        store.put_num(0, 0x0102_0304_u32).unwrap();
        assert_eq!(store.get_byte(0).unwrap(), 1);

        let mut swapped = SwappedStore::new(store);
        assert_eq!(swapped.get_num::<u32>(0).unwrap(), 0x0403_0201);

        swapped.put_num(4, 0x0A0B_u16).unwrap();
        assert_eq!(swapped.get_byte(4).unwrap(), 0x0B);
    }

    #[test]
    fn store_ext_rejects_out_of_bounds_numbers() {
        let mut store = HeapStore::new(4).unwrap();
        assert!(matches!(store.get_num::<u64>(0), Err(Error::OutOfBounds { .. })));
        assert!(matches!(store.put_num(1, 7_u32), Err(Error::OutOfBounds { .. })));
    }
}
