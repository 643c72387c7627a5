// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{Level, event};

use crate::store::{
    MapMode, Store, StoreKind, check_range, check_size, remove_scratch_file, round_to_pow2,
};
use crate::{Error, IoOperation, Result};

#[derive(Debug)]
enum Mapping {
    // Nothing is mapped while the window is empty or the store is closed.
    Unmapped,
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Unmapped => &[],
            Self::ReadWrite(map) => &map[..],
            Self::ReadOnly(map) => &map[..],
        }
    }
}

/// A store over a window of a file mapped into the process address space.
///
/// The mapped window is limited to [`MAX_MAPPED_SIZE`][crate::store::MAX_MAPPED_SIZE] bytes; the
/// file itself may be larger. Growing the store extends the file if needed and remaps the window,
/// preserving content. [`Store::flush()`] returns only after the dirty pages reach the file.
///
/// # Examples
///
/// ```
/// use storebuf::store::{MapMode, MappedStore, Store};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("data.bin");
///
/// let mut store = MappedStore::open(&path, 64, MapMode::ReadWrite)?;
/// store.write(10, &[0xFF])?;
/// store.flush()?;
/// store.close()?;
///
/// let mut store = MappedStore::open(&path, 64, MapMode::ReadOnly)?;
/// let mut byte = [0];
/// store.read(10, &mut byte)?;
/// assert_eq!(byte, [0xFF]);
/// # Ok::<(), storebuf::Error>(())
/// ```
#[derive(Debug)]
pub struct MappedStore {
    file: Option<File>,
    path: PathBuf,
    file_offset: u64,
    size: usize,
    mode: MapMode,
    mapping: Mapping,
    delete_on_drop: bool,
}

impl MappedStore {
    /// Creates (or opens) the file at `path` and maps a read-write window of at least `size`
    /// bytes from its start. The size is rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Fails if `path` is empty, the rounded size exceeds the mapping ceiling or the file cannot
    /// be opened, extended or mapped.
    pub fn allocate(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let size = round_to_pow2(StoreKind::Mapped, size)?;
        Self::open(path, size, MapMode::ReadWrite)
    }

    /// Opens the file at `path` and maps exactly `size` bytes from its start.
    ///
    /// In [`MapMode::ReadWrite`] the file is created if absent and extended to `size` if shorter.
    /// In [`MapMode::ReadOnly`] the file must exist and be at least `size` bytes long.
    ///
    /// # Errors
    ///
    /// Fails if `path` is empty, `size` exceeds the mapping ceiling or the file cannot be
    /// opened, extended or mapped.
    pub fn open(path: impl AsRef<Path>, size: usize, mode: MapMode) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("mapped store requires a file path"));
        }

        check_size(StoreKind::Mapped, size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .create(mode.is_writable())
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(IoOperation::Open, e))?;

        Self::map_window(file, path.to_path_buf(), 0, size, mode)
    }

    /// Maps `[file_offset, file_offset + size)` of an already opened file.
    pub(crate) fn map_window(
        file: File,
        path: PathBuf,
        file_offset: u64,
        size: usize,
        mode: MapMode,
    ) -> Result<Self> {
        check_size(StoreKind::Mapped, size)?;

        let mut store = Self {
            file: Some(file),
            path,
            file_offset,
            size: 0,
            mode,
            mapping: Mapping::Unmapped,
            delete_on_drop: false,
        };

        store.remap(size)?;

        event!(
            Level::DEBUG,
            path = %store.path.display(),
            file_offset,
            size,
            ?mode,
            "mapped file store"
        );

        Ok(store)
    }

    /// The path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The offset of the mapped window within the file.
    #[must_use]
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Whether the window is mapped for reading only or for reading and writing.
    #[must_use]
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Marks the file as scratch space: it is removed when the store is dropped.
    #[must_use]
    pub fn delete_on_drop(mut self) -> Self {
        self.delete_on_drop = true;
        self
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::Closed)
    }

    /// Replaces the current mapping with one of `size` bytes, extending the file if required.
    ///
    /// On failure the current mapping, its size and the file length are left as they were.
    fn remap(&mut self, size: usize) -> Result<()> {
        let file = self.file()?;
        let required_len = self.file_offset + size as u64;
        let current_len = file.metadata().map_err(|e| Error::io(IoOperation::Open, e))?.len();
        let extends = current_len < required_len;

        if extends {
            if !self.mode.is_writable() {
                return Err(Error::invalid_argument(format!(
                    "read-only file {} has {current_len} bytes but {required_len} are required",
                    self.path.display()
                )));
            }

            file.set_len(required_len).map_err(|e| Error::io(IoOperation::Resize, e))?;
        }

        let mapping = match self.map(file, size) {
            Ok(mapping) => mapping,
            Err(e) => {
                if extends {
                    self.restore_len(current_len);
                }
                return Err(e);
            }
        };

        // The shared mapping being replaced has already propagated every write to the file.
        self.mapping = mapping;
        self.size = size;
        Ok(())
    }

    fn map(&self, file: &File, size: usize) -> Result<Mapping> {
        if size == 0 {
            return Ok(Mapping::Unmapped);
        }

        let mut options = MmapOptions::new();
        options.offset(self.file_offset).len(size);

        if self.mode.is_writable() {
            // SAFETY: The file is exclusively owned by this store. Modification of the file by
            // other processes while it is mapped is outside the contract of this type.
            let map = unsafe { options.map_mut(file) };
            Ok(Mapping::ReadWrite(map.map_err(|e| Error::io(IoOperation::Map, e))?))
        } else {
            // SAFETY: As above.
            let map = unsafe { options.map(file) };
            Ok(Mapping::ReadOnly(map.map_err(|e| Error::io(IoOperation::Map, e))?))
        }
    }

    fn restore_len(&self, len: u64) {
        let Some(file) = &self.file else {
            return;
        };

        if let Err(e) = file.set_len(len) {
            event!(
                Level::WARN,
                path = %self.path.display(),
                len,
                error = %e,
                "could not restore file length after failed remap"
            );
        }
    }

    fn writable_bytes(&mut self) -> Result<&mut [u8]> {
        self.file()?;

        match &mut self.mapping {
            Mapping::ReadWrite(map) => Ok(&mut map[..]),
            Mapping::Unmapped if self.mode.is_writable() => Ok(Default::default()),
            Mapping::Unmapped | Mapping::ReadOnly(_) => {
                Err(Error::unsupported(StoreKind::Mapped, "writing a read-only mapping"))
            }
        }
    }
}

impl Store for MappedStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Mapped
    }

    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.file()?;
        check_range(offset, dst.len(), self.size)?;

        dst.copy_from_slice(&self.mapping.bytes()[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let size = self.size;
        let bytes = self.writable_bytes()?;
        check_range(offset, src.len(), size)?;

        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.file()?;

        if !self.mode.is_writable() {
            return Err(Error::unsupported(StoreKind::Mapped, "resizing a read-only mapping"));
        }

        check_size(StoreKind::Mapped, new_size)?;

        if new_size == self.size {
            return Ok(());
        }

        event!(
            Level::DEBUG,
            path = %self.path.display(),
            old_size = self.size,
            new_size,
            "remapping file store"
        );

        self.remap(new_size)
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?;

        if let Mapping::ReadWrite(map) = &self.mapping {
            map.flush().map_err(|e| Error::io(IoOperation::Sync, e))?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.is_some() {
            event!(Level::DEBUG, path = %self.path.display(), "unmapping file store");
        }

        self.mapping = Mapping::Unmapped;
        self.size = 0;
        self.file = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn delete(&mut self) -> Result<()> {
        self.close()?;

        event!(Level::DEBUG, path = %self.path.display(), "deleting mapped file");

        fs::remove_file(&self.path).map_err(|e| Error::io(IoOperation::Delete, e))
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        let size = self.size;
        let bytes = self.writable_bytes()?;
        check_range(from, len, size)?;
        check_range(to, len, size)?;

        bytes.copy_within(from..from + len, to);
        Ok(())
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        let size = self.size;
        let bytes = self.writable_bytes()?;
        check_range(offset, len, size)?;

        bytes[offset..offset + len].fill(0);
        Ok(())
    }
}

impl Drop for MappedStore {
    fn drop(&mut self) {
        if self.delete_on_drop {
            self.mapping = Mapping::Unmapped;
            self.file = None;
            remove_scratch_file(&self.path);
        }
    }
}
