// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Writes records through a memory-mapped buffer and reads them back after remapping.

use std::env;

use storebuf::store::{MapMode, MappedStore};
use storebuf::{Buffer, UNBOUNDED};

fn main() -> storebuf::Result<()> {
    let path = env::temp_dir().join(format!("storebuf-example-{}.map", std::process::id()));

    let mut buffer = Buffer::new(MappedStore::allocate(&path, 64)?, 64, UNBOUNDED)?;
    for record in 0..100_u64 {
        buffer.write_u64(record * record)?;
    }

    // 800 bytes of records grew the mapping to the next power of two.
    println!("mapped {} bytes at {}", buffer.capacity(), path.display());

    buffer.flush()?;
    buffer.close()?;

    let mut buffer = Buffer::wrap(MappedStore::open(&path, 1024, MapMode::ReadOnly)?);
    buffer.set_limit(800)?;

    let mut sum = 0;
    while buffer.has_remaining() {
        sum += buffer.read_u64()?;
    }
    println!("sum of squares below 100: {sum}");

    buffer.delete()
}
