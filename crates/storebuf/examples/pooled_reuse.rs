// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shows how a pooled allocator recycles stores across many short-lived buffers.

use storebuf::{Allocator, AllocatorConfig, StoreConfig};

fn main() -> storebuf::Result<()> {
    // In real-world code the allocator would be built once from application configuration.
    let allocator = AllocatorConfig::default()
        .with_pooled(true)
        .with_store(StoreConfig::Native)
        .with_initial_capacity(256)
        .build()?;

    for message in 0..1000_u32 {
        let mut buffer = allocator.allocate_default()?;

        buffer.write_u32(message)?;
        buffer.write_string("hello from the pool")?;
        buffer.flip();

        // The receiving side consumes the frame and hands the buffer back.
        assert_eq!(buffer.read_u32()?, message);
        let _greeting = buffer.read_string()?;

        allocator.release(buffer)?;
    }

    if let Some(pool) = allocator.as_pooled() {
        let stats = pool.stats();
        println!(
            "created {} store(s), reused {} time(s), {} outstanding",
            stats.created, stats.reused, stats.outstanding
        );
    }

    Ok(())
}
