// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Allocators that hand out [`Buffer`][crate::Buffer]s over a configured store technology.
//!
//! [`UnpooledAllocator`] creates a fresh store for every buffer. [`PooledAllocator`] keeps
//! released stores in power-of-two size classes and hands them to the next buffer of the same
//! class. [`AllocatorConfig`] picks one of the two from configuration.

mod allocator;
mod config;
mod factory;
mod pooled;
mod unpooled;

pub use allocator::Allocator;
pub use config::{AllocatorConfig, BufferAllocator};
pub use factory::StoreConfig;
pub(crate) use pooled::Lease;
pub use pooled::{PoolStats, PooledAllocator, PooledAllocatorBuilder};
pub use unpooled::UnpooledAllocator;
