// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{Level, event};

use crate::store::{FileStore, HeapStore, MappedStore, NativeStore, Store, StoreKind};
use crate::{Error, Result};

// Unique within the process; the process id keeps concurrent processes apart.
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// The store technology an allocator creates buffers over.
///
/// File-backed stores created by an allocator are scratch space: each gets a uniquely named file
/// in `directory`, removed again when the store is dropped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum StoreConfig {
    /// [`HeapStore`].
    #[default]
    Heap,
    /// [`NativeStore`].
    Native,
    /// [`MappedStore`] over scratch files in `directory`.
    Mapped {
        /// The directory that holds the scratch files.
        directory: PathBuf,
    },
    /// [`FileStore`] over scratch files in `directory`.
    File {
        /// The directory that holds the scratch files.
        directory: PathBuf,
    },
}

impl StoreConfig {
    /// The kind of store this configuration creates.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        match self {
            Self::Heap => StoreKind::Heap,
            Self::Native => StoreKind::Native,
            Self::Mapped { .. } => StoreKind::Mapped,
            Self::File { .. } => StoreKind::File,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Heap | Self::Native => Ok(()),
            Self::Mapped { directory } | Self::File { directory } => {
                if directory.is_dir() {
                    Ok(())
                } else {
                    Err(Error::invalid_argument(format!(
                        "scratch directory {} does not exist",
                        directory.display()
                    )))
                }
            }
        }
    }

    /// Creates a store of at least `size` bytes.
    ///
    /// Heap and native stores have exactly `size` bytes. File-backed stores round up to the next
    /// power of two.
    pub(crate) fn create(&self, size: usize) -> Result<Box<dyn Store>> {
        let store: Box<dyn Store> = match self {
            Self::Heap => Box::new(HeapStore::new(size)?),
            Self::Native => Box::new(NativeStore::new(size)?),
            Self::Mapped { directory } => {
                Box::new(MappedStore::allocate(scratch_path(directory), size)?.delete_on_drop())
            }
            Self::File { directory } => {
                Box::new(FileStore::allocate(scratch_path(directory), size)?.delete_on_drop())
            }
        };

        event!(Level::DEBUG, kind = %self.kind(), size = store.size(), "created store");

        Ok(store)
    }
}

fn scratch_path(directory: &Path) -> PathBuf {
    let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
    directory.join(format!("storebuf-{}-{id}.bin", process::id()))
}
