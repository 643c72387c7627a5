// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::alloc::pooled::DEFAULT_MAX_RETAINED_PER_CLASS;
use crate::alloc::{Allocator, PooledAllocator, StoreConfig, UnpooledAllocator};
use crate::store::{StoreKind, check_size};
use crate::{Buffer, DEFAULT_INITIAL_CAPACITY, Error, Result, UNBOUNDED};

/// Selects and configures an allocator.
///
/// These are the only knobs of the buffer layer: pooled or unpooled, the store technology and
/// the default capacities. With the `serde` feature the configuration can be embedded in the
/// configuration files of an application.
///
/// # Examples
///
/// ```
/// use storebuf::{Allocator, AllocatorConfig, StoreConfig};
///
/// let allocator = AllocatorConfig::default()
///     .with_pooled(true)
///     .with_store(StoreConfig::Native)
///     .with_initial_capacity(256)
///     .build()?;
///
/// let buffer = allocator.allocate_default()?;
/// assert_eq!(buffer.capacity(), 256);
/// allocator.release(buffer)?;
/// # Ok::<(), storebuf::Error>(())
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AllocatorConfig {
    pooled: bool,
    store: StoreConfig,
    initial_capacity: usize,
    max_capacity: usize,
    zero_on_reuse: bool,
    max_retained_per_class: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            pooled: false,
            store: StoreConfig::default(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_capacity: UNBOUNDED,
            zero_on_reuse: true,
            max_retained_per_class: DEFAULT_MAX_RETAINED_PER_CLASS,
        }
    }
}

impl AllocatorConfig {
    /// Whether released buffers are pooled for reuse. Defaults to `false`.
    #[must_use]
    pub fn with_pooled(mut self, pooled: bool) -> Self {
        self.pooled = pooled;
        self
    }

    /// The store technology. Defaults to [`StoreConfig::Heap`].
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Capacity of buffers from [`BufferAllocator::allocate_default()`]. Defaults to 4096.
    #[must_use]
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Growth limit of buffers from [`BufferAllocator::allocate_default()`].
    ///
    /// Defaults to [`UNBOUNDED`], which is clamped to the ceiling of the store technology.
    #[must_use]
    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Whether a pool zeroes recycled stores before reuse. Defaults to `true`.
    #[must_use]
    pub fn with_zero_on_reuse(mut self, zero_on_reuse: bool) -> Self {
        self.zero_on_reuse = zero_on_reuse;
        self
    }

    /// How many retired stores a pool keeps per size class. Defaults to 64.
    #[must_use]
    pub fn with_max_retained_per_class(mut self, max_retained_per_class: usize) -> Self {
        self.max_retained_per_class = max_retained_per_class;
        self
    }

    /// Whether released buffers are pooled for reuse.
    #[must_use]
    pub fn pooled(&self) -> bool {
        self.pooled
    }

    /// The store technology.
    #[must_use]
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Capacity of buffers from [`BufferAllocator::allocate_default()`].
    #[must_use]
    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    /// Growth limit of buffers from [`BufferAllocator::allocate_default()`].
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Whether a pool zeroes recycled stores before reuse.
    #[must_use]
    pub fn zero_on_reuse(&self) -> bool {
        self.zero_on_reuse
    }

    /// How many retired stores a pool keeps per size class.
    #[must_use]
    pub fn max_retained_per_class(&self) -> usize {
        self.max_retained_per_class
    }

    /// Validates the configuration and creates the allocator it describes.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if the initial capacity exceeds the maximum capacity
    /// or the ceiling of the store technology, or if the scratch directory of a file-backed store
    /// does not exist.
    pub fn build(&self) -> Result<BufferAllocator> {
        if self.initial_capacity > self.max_capacity {
            return Err(Error::invalid_argument(format!(
                "initial capacity {} exceeds maximum capacity {}",
                self.initial_capacity, self.max_capacity
            )));
        }

        check_size(self.store.kind(), self.initial_capacity)?;
        self.store.validate()?;

        let flavor = if self.pooled {
            Flavor::Pooled(
                PooledAllocator::builder(self.store.clone())
                    .zero_on_reuse(self.zero_on_reuse)
                    .max_retained_per_class(self.max_retained_per_class)
                    .build(),
            )
        } else {
            Flavor::Unpooled(UnpooledAllocator::new(self.store.clone()))
        };

        event!(
            Level::DEBUG,
            pooled = self.pooled,
            kind = %self.store.kind(),
            initial_capacity = self.initial_capacity,
            "built allocator"
        );

        Ok(BufferAllocator {
            flavor,
            initial_capacity: self.initial_capacity,
            max_capacity: self.max_capacity.min(self.store.kind().max_size()),
        })
    }
}

/// The allocator described by an [`AllocatorConfig`].
///
/// Besides implementing [`Allocator`] it remembers the configured capacities for
/// [`allocate_default()`][Self::allocate_default].
#[derive(Clone, Debug)]
pub struct BufferAllocator {
    flavor: Flavor,
    initial_capacity: usize,
    max_capacity: usize,
}

#[derive(Clone, Debug)]
enum Flavor {
    Unpooled(UnpooledAllocator),
    Pooled(PooledAllocator),
}

impl BufferAllocator {
    /// Allocates a buffer with the configured initial and maximum capacity.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be created.
    pub fn allocate_default(&self) -> Result<Buffer> {
        self.allocate(self.initial_capacity, self.max_capacity)
    }

    /// The pool behind this allocator, if it is pooled.
    #[must_use]
    pub fn as_pooled(&self) -> Option<&PooledAllocator> {
        match &self.flavor {
            Flavor::Pooled(pool) => Some(pool),
            Flavor::Unpooled(_) => None,
        }
    }
}

impl Allocator for BufferAllocator {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn store_kind(&self) -> StoreKind {
        match &self.flavor {
            Flavor::Unpooled(allocator) => allocator.store_kind(),
            Flavor::Pooled(allocator) => allocator.store_kind(),
        }
    }

    fn allocate(&self, initial_capacity: usize, max_capacity: usize) -> Result<Buffer> {
        match &self.flavor {
            Flavor::Unpooled(allocator) => allocator.allocate(initial_capacity, max_capacity),
            Flavor::Pooled(allocator) => allocator.acquire(initial_capacity, max_capacity),
        }
    }

    fn release(&self, buffer: Buffer) -> Result<()> {
        match &self.flavor {
            Flavor::Unpooled(allocator) => allocator.release(buffer),
            Flavor::Pooled(allocator) => allocator.release(buffer),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MAX_MAPPED_SIZE;

    #[test]
    fn defaults() {
        let config = AllocatorConfig::default();

        assert!(!config.pooled());
        assert_eq!(config.store(), &StoreConfig::Heap);
        assert_eq!(config.initial_capacity(), 4096);
        assert_eq!(config.max_capacity(), UNBOUNDED);
        assert!(config.zero_on_reuse());
        assert_eq!(config.max_retained_per_class(), 64);
    }

    #[test]
    fn unpooled_allocator_from_defaults() {
        let allocator = AllocatorConfig::default().build().unwrap();
        assert!(allocator.as_pooled().is_none());
        assert_eq!(allocator.store_kind(), StoreKind::Heap);

        let buffer = allocator.allocate_default().unwrap();
        assert_eq!(buffer.capacity(), 4096);
        assert!(!buffer.is_pooled());
        allocator.release(buffer).unwrap();
    }

    #[test]
    fn pooled_allocator_carries_policy() {
        let allocator = AllocatorConfig::default()
            .with_pooled(true)
            .with_zero_on_reuse(false)
            .with_max_retained_per_class(3)
            .with_initial_capacity(64)
            .with_max_capacity(128)
            .build()
            .unwrap();

        let pool = allocator.as_pooled().unwrap();
        assert!(!pool.zero_on_reuse());
        assert_eq!(pool.max_retained_per_class(), 3);

        let buffer = allocator.allocate_default().unwrap();
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.max_capacity(), 128);
        assert!(buffer.is_pooled());

        allocator.release(buffer).unwrap();
        assert_eq!(pool.stats().retained, 1);
    }

    #[test]
    fn max_capacity_is_clamped_to_store_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = AllocatorConfig::default()
            .with_store(StoreConfig::Mapped {
                directory: dir.path().to_path_buf(),
            })
            .with_initial_capacity(16)
            .build()
            .unwrap();

        let buffer = allocator.allocate_default().unwrap();
        assert_eq!(buffer.max_capacity(), MAX_MAPPED_SIZE);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let inverted = AllocatorConfig::default()
            .with_initial_capacity(64)
            .with_max_capacity(32);
        assert!(matches!(inverted.build(), Err(Error::InvalidArgument(_))));

        let too_large = AllocatorConfig::default().with_store(StoreConfig::Mapped {
            directory: std::env::temp_dir(),
        });
        let too_large = too_large.with_initial_capacity(MAX_MAPPED_SIZE + 1);
        assert!(matches!(too_large.build(), Err(Error::InvalidArgument(_))));

        let missing_dir = AllocatorConfig::default().with_store(StoreConfig::File {
            directory: "/definitely/not/a/real/directory".into(),
        });
        assert!(matches!(missing_dir.build(), Err(Error::InvalidArgument(_))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_with_defaults() {
        let config: AllocatorConfig = serde_json::from_str(
            r#"{ "pooled": true, "store": { "file": { "directory": "/tmp" } } }"#,
        )
        .unwrap();

        assert!(config.pooled());
        assert_eq!(config.store().kind(), StoreKind::File);
        assert_eq!(config.initial_capacity(), 4096);

        let json = serde_json::to_string(&AllocatorConfig::default()).unwrap();
        let back: AllocatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AllocatorConfig::default());
    }
}
