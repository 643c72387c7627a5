// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Bounds-checked, endian-aware buffers over heap, native, memory-mapped and file storage.
//!
//! The crate has three layers:
//!
//! * A [`Store`] is an addressable byte range `[0, size)` backed by one storage technology:
//!   [`HeapStore`], [`NativeStore`], [`MappedStore`] or [`FileStore`]. Every access is checked
//!   against the size before anything is touched.
//! * A [`Buffer`] is a cursor over a window of a store, with the familiar
//!   `position <= limit <= capacity` discipline. Relative reads and writes move the position;
//!   absolute `*_at` variants leave it alone. Numbers are encoded in the
//!   [`ByteOrder`] of the buffer. A write that does not fit grows the buffer to the next power
//!   of two, up to its maximum capacity.
//! * An [`Allocator`] hands out buffers. [`UnpooledAllocator`] creates a fresh store every time;
//!   [`PooledAllocator`] recycles the stores of released buffers by power-of-two size class.
//!
//! # Writing and reading
//!
//! ```
//! use storebuf::{Allocator, ByteOrder, UnpooledAllocator};
//!
//! let allocator = UnpooledAllocator::default();
//! let mut buffer = allocator.allocate(16, 1024)?;
//!
//! buffer.write_u32(0xCAFE_F00D)?;
//! buffer.write_string("hello")?;
//! buffer.flip();
//!
//! assert_eq!(buffer.read_u32()?, 0xCAFE_F00D);
//! assert_eq!(buffer.read_string()?, "hello");
//! assert!(!buffer.has_remaining());
//! # Ok::<(), storebuf::Error>(())
//! ```
//!
//! # Pooling
//!
//! A pooled buffer returns to its pool when it is released, closed or dropped. Its store is
//! zeroed before the next tenant sees it unless the pool is configured otherwise.
//!
//! ```
//! use storebuf::{Allocator, PooledAllocator, StoreConfig};
//!
//! let pool = PooledAllocator::new(StoreConfig::Heap);
//!
//! for _ in 0..100 {
//!     let mut buffer = pool.allocate(512, 512)?;
//!     buffer.write_u64(1)?;
//!     pool.release(buffer)?;
//! }
//!
//! assert_eq!(pool.stats().created, 1);
//! # Ok::<(), storebuf::Error>(())
//! ```
//!
//! # Thread safety
//!
//! Allocators may be shared freely between threads. Buffers and stores are [`Send`] but are
//! meant to be used from one thread at a time.
//!
//! [`Store`]: store::Store
//! [`HeapStore`]: store::HeapStore
//! [`NativeStore`]: store::NativeStore
//! [`MappedStore`]: store::MappedStore
//! [`FileStore`]: store::FileStore

mod alloc;
mod buffer;
mod buffer_get;
mod buffer_io;
mod buffer_put;
mod error;
mod order;
pub mod store;

pub use alloc::{
    Allocator, AllocatorConfig, BufferAllocator, PoolStats, PooledAllocator,
    PooledAllocatorBuilder, StoreConfig, UnpooledAllocator,
};
pub use buffer::Buffer;
pub use error::{Error, IoOperation, Result};
pub use order::ByteOrder;

/// Passed as a maximum capacity: grow up to the ceiling of the store technology.
pub const UNBOUNDED: usize = usize::MAX;

/// Initial capacity of buffers from [`BufferAllocator::allocate_default()`] unless configured
/// otherwise.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4096;

#[cfg(test)]
mod testing;
