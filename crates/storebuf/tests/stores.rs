// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! File-backed stores seen through buffers.

use std::fs;

use storebuf::store::{FileStore, MapMode, MappedStore, Store, StoreExt, SwappedStore};
use storebuf::{Buffer, ByteOrder, Error, UNBOUNDED};

#[test]
fn mapped_buffer_grows_by_remapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.map");

    let mut buffer = Buffer::new(MappedStore::allocate(&path, 8).unwrap(), 8, UNBOUNDED).unwrap();
    buffer.write_bytes(&[0x11; 8]).unwrap();
    buffer.write_bytes(&[0x22; 8]).unwrap();
    assert_eq!(buffer.capacity(), 16);

    buffer.flush().unwrap();
    buffer.close().unwrap();

    let on_disk = fs::read(&path).unwrap();
    assert_eq!(on_disk.len(), 16);
    assert_eq!(&on_disk[..8], &[0x11; 8]);
    assert_eq!(&on_disk[8..], &[0x22; 8]);
}

#[test]
fn file_buffer_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.bin");

    let mut buffer = Buffer::new(FileStore::allocate(&path, 4).unwrap(), 4, UNBOUNDED).unwrap();
    for record in 0..32_u32 {
        buffer.write_u32(record).unwrap();
    }
    assert_eq!(buffer.capacity(), 128);
    buffer.flush().unwrap();
    buffer.close().unwrap();

    let store = FileStore::open(&path, 128, MapMode::ReadOnly).unwrap();
    let mut buffer = Buffer::wrap(store);
    for record in 0..32_u32 {
        assert_eq!(buffer.read_u32().unwrap(), record);
    }
    assert!(matches!(buffer.write_u8_at(0, 1), Err(Error::Unsupported { .. })));
}

#[test]
fn file_store_only_seeks_on_jumps() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::allocate(dir.path().join("seek.bin"), 64).unwrap();

    for i in 0..8_u64 {
        let offset = usize::try_from(i * 8).unwrap();
        store.put_num(offset, i).unwrap();
    }
    assert_eq!(store.seek_count(), 0);

    assert_eq!(store.get_num::<u64>(32).unwrap(), 4);
    assert_eq!(store.get_num::<u64>(40).unwrap(), 5);
    assert_eq!(store.seek_count(), 1);
}

#[test]
fn file_window_mapped_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("window.bin");

    let mut file = FileStore::allocate(&path, 4096).unwrap();
    file.write(100, b"mapped").unwrap();

    let mut window = Buffer::wrap(file.map(100, 6, MapMode::ReadWrite).unwrap());
    let mut bytes = [0; 6];
    window.read_bytes(&mut bytes).unwrap();
    assert_eq!(&bytes, b"mapped");
    window.close().unwrap();

    Buffer::wrap(file).delete().unwrap();
    assert!(!path.exists());
}

#[test]
fn swapped_store_reverses_store_level_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swapped.bin");

    let mut store = SwappedStore::new(FileStore::allocate(&path, 8).unwrap());
    store.put_num(0, 0x0102_0304_u32).unwrap();
    assert_eq!(store.order(), ByteOrder::BigEndian.swapped());

    drop(store.into_inner());
    assert_eq!(&fs::read(&path).unwrap()[..4], &[4, 3, 2, 1]);
}
