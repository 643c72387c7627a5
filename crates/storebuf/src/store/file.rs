// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{Level, event};

use crate::store::{
    MapMode, MappedStore, Store, StoreKind, check_range, check_size, remove_scratch_file,
    round_to_pow2,
};
use crate::{Error, IoOperation, Result};

/// A store that reads and writes a file through explicit seek-then-read/write calls.
///
/// The store remembers where the file pointer is and only seeks when an access starts somewhere
/// else, so sequential access costs one system call per read or write.
///
/// Unlike the in-memory stores, [`Store::resize()`] refuses to shrink a file store. Use
/// [`FileStore::truncate()`] to cut a file short.
#[derive(Debug)]
pub struct FileStore {
    file: Option<File>,
    path: PathBuf,
    size: usize,
    mode: MapMode,

    // `None` when the position of the OS file pointer is unknown, e.g. after a failed call.
    pointer: Option<u64>,
    seeks: u64,
    delete_on_drop: bool,
}

impl FileStore {
    /// Creates (or opens) the file at `path` with a length of at least `size` bytes, rounded up
    /// to the next power of two.
    ///
    /// # Errors
    ///
    /// Fails if `path` is empty, the rounded size exceeds the store ceiling or the file cannot
    /// be opened or extended.
    pub fn allocate(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let size = round_to_pow2(StoreKind::File, size)?;
        Self::open(path, size, MapMode::ReadWrite)
    }

    /// Opens the file at `path` as a store of exactly `size` bytes.
    ///
    /// In [`MapMode::ReadWrite`] the file is created if absent and extended to `size` if shorter;
    /// a longer file keeps its trailing bytes but they are outside the store. In
    /// [`MapMode::ReadOnly`] the file must already be at least `size` bytes long.
    ///
    /// # Errors
    ///
    /// Fails if `path` is empty, `size` exceeds the store ceiling or the file cannot be opened
    /// or extended.
    pub fn open(path: impl AsRef<Path>, size: usize, mode: MapMode) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("file store requires a file path"));
        }

        check_size(StoreKind::File, size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .create(mode.is_writable())
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(IoOperation::Open, e))?;

        let current_len = file.metadata().map_err(|e| Error::io(IoOperation::Open, e))?.len();
        if current_len < size as u64 {
            if !mode.is_writable() {
                return Err(Error::invalid_argument(format!(
                    "read-only file {} has {current_len} bytes but {size} are required",
                    path.display()
                )));
            }

            file.set_len(size as u64).map_err(|e| Error::io(IoOperation::Resize, e))?;
        }

        event!(Level::DEBUG, path = %path.display(), size, ?mode, "opened file store");

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            size,
            mode,
            pointer: Some(0),
            seeks: 0,
            delete_on_drop: false,
        })
    }

    /// The path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file was opened for reading only or for reading and writing.
    #[must_use]
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Number of seek calls issued to the operating system so far.
    #[must_use]
    pub fn seek_count(&self) -> u64 {
        self.seeks
    }

    /// Shortens (or extends) the file to exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed or read-only, or if the file length cannot be changed.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        self.ensure_writable("truncating")?;
        check_size(StoreKind::File, len)?;

        event!(
            Level::DEBUG,
            path = %self.path.display(),
            old_size = self.size,
            new_size = len,
            "truncating file store"
        );

        self.set_file_len(len)
    }

    /// Maps `[offset, offset + len)` of the file into memory as a separate store.
    ///
    /// The mapped store has its own handle to the file, so it remains usable after this store
    /// is closed. Writes through either store are visible through the other once flushed.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed, the window exceeds the mapping ceiling, a writable window is
    /// requested from a read-only store or the window cannot be mapped.
    pub fn map(&self, offset: usize, len: usize, mode: MapMode) -> Result<MappedStore> {
        let file = self.file()?;

        if mode.is_writable() && !self.mode.is_writable() {
            return Err(Error::unsupported(StoreKind::File, "writable mapping of a read-only file"));
        }

        check_range(offset, len, self.size)?;

        let handle = file.try_clone().map_err(|e| Error::io(IoOperation::Open, e))?;
        MappedStore::map_window(handle, self.path.clone(), offset as u64, len, mode)
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

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        self.file()?;

        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(Error::unsupported(StoreKind::File, operation))
        }
    }

    fn set_file_len(&mut self, len: usize) -> Result<()> {
        let file = self.file()?;
        file.set_len(len as u64).map_err(|e| Error::io(IoOperation::Resize, e))?;
        self.size = len;
        Ok(())
    }

    /// Moves the OS file pointer to `offset` unless it is already there.
    fn seek_to(&mut self, offset: usize) -> Result<&File> {
        let target = offset as u64;

        let Some(mut file) = self.file.as_ref() else {
            return Err(Error::Closed);
        };

        if self.pointer != Some(target) {
            self.pointer = None;
            self.seeks += 1;
            file.seek(SeekFrom::Start(target)).map_err(|e| Error::io(IoOperation::Seek, e))?;
            self.pointer = Some(target);
        }

        Ok(file)
    }
}

impl Store for FileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::File
    }

    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.file()?;
        check_range(offset, dst.len(), self.size)?;

        if dst.is_empty() {
            return Ok(());
        }

        let mut file = self.seek_to(offset)?;
        let result = file.read_exact(dst);

        self.pointer = result.is_ok().then_some((offset + dst.len()) as u64);
        result.map_err(|e| Error::io(IoOperation::Read, e))
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.ensure_writable("writing a read-only file")?;
        check_range(offset, src.len(), self.size)?;

        if src.is_empty() {
            return Ok(());
        }

        let mut file = self.seek_to(offset)?;
        let result = file.write_all(src);

        self.pointer = result.is_ok().then_some((offset + src.len()) as u64);
        result.map_err(|e| Error::io(IoOperation::Write, e))
    }

    /// Grows the file to `new_size` bytes. Shrinking is rejected; use [`FileStore::truncate()`].
    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.ensure_writable("resizing a read-only file")?;
        check_size(StoreKind::File, new_size)?;

        if new_size < self.size {
            return Err(Error::invalid_argument(format!(
                "cannot shrink file store from {} to {new_size} bytes, use truncate",
                self.size
            )));
        }

        if new_size == self.size {
            return Ok(());
        }

        event!(
            Level::DEBUG,
            path = %self.path.display(),
            old_size = self.size,
            new_size,
            "growing file store"
        );

        self.set_file_len(new_size)
    }

    /// Forces written bytes and file metadata to the storage device.
    fn flush(&mut self) -> Result<()> {
        let file = self.file()?;

        if self.mode.is_writable() {
            file.sync_all().map_err(|e| Error::io(IoOperation::Sync, e))?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            event!(Level::DEBUG, path = %self.path.display(), "closed file store");
        }

        self.pointer = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn delete(&mut self) -> Result<()> {
        self.close()?;

        event!(Level::DEBUG, path = %self.path.display(), "deleting file store");

        fs::remove_file(&self.path).map_err(|e| Error::io(IoOperation::Delete, e))
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if self.delete_on_drop {
            self.file = None;
            remove_scratch_file(&self.path);
        }
    }
}
