// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use thiserror::Error;

use crate::store::StoreKind;

/// Any error that may arise from the stores, buffers and allocators of this crate.
///
/// Every failing operation reports its error synchronously and leaves the visible contents
/// of the store unchanged: bounds and capacity are validated before any byte is written.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument was outside the domain accepted by the operation, e.g. a capacity above the
    /// ceiling of the store technology or an initial capacity larger than the maximum capacity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A read or write touched bytes outside the accessible window.
    ///
    /// `bound` is the exclusive upper bound that the access `[offset, offset + length)` exceeded.
    #[error("out of bounds: {length} bytes at offset {offset} exceed bound {bound}")]
    OutOfBounds {
        /// Offset of the rejected access.
        offset: usize,
        /// Length of the rejected access.
        length: usize,
        /// Exclusive upper bound that was exceeded.
        bound: usize,
    },

    /// A write needed the buffer to grow beyond its maximum capacity.
    #[error("capacity exceeded: {required} bytes required but maximum capacity is {max_capacity}")]
    CapacityExceeded {
        /// The capacity the write would have needed.
        required: usize,
        /// The ceiling of the buffer.
        max_capacity: usize,
    },

    /// An underlying file or mapping operation failed.
    #[error("I/O failure during {operation}")]
    Io {
        /// The step that failed.
        operation: IoOperation,
        /// The error reported by the operating system.
        #[source]
        source: std::io::Error,
    },

    /// A buffer was released into a pool that does not own it.
    #[error("pool misuse: {0}")]
    PoolMisuse(String),

    /// The store has already been closed.
    #[error("store is closed")]
    Closed,

    /// The store technology does not support the operation.
    #[error("{operation} is not supported by {kind} store")]
    Unsupported {
        /// Kind of the store that rejected the operation.
        kind: StoreKind,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// Stored bytes could not be decoded into the requested value.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    pub(crate) fn io(operation: IoOperation, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) const fn out_of_bounds(offset: usize, length: usize, bound: usize) -> Self {
        Self::OutOfBounds { offset, length, bound }
    }

    pub(crate) const fn unsupported(kind: StoreKind, operation: &'static str) -> Self {
        Self::Unsupported { kind, operation }
    }
}

/// A specialized `Result` for operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The file or mapping step during which an [`Error::Io`] was raised.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum IoOperation {
    /// Opening or creating a file.
    Open,
    /// Mapping a file region into memory.
    Map,
    /// Moving the file pointer.
    Seek,
    /// Reading bytes.
    Read,
    /// Writing bytes.
    Write,
    /// Forcing written bytes to stable storage.
    Sync,
    /// Changing the length of a file.
    Resize,
    /// Removing a file from the filesystem.
    Delete,
}

impl fmt::Display for IoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Map => "map",
            Self::Seek => "seek",
            Self::Read => "read",
            Self::Write => "write",
            Self::Sync => "sync",
            Self::Resize => "resize",
            Self::Delete => "delete",
        };

        f.write_str(name)
    }
}

/// Represents a storage error as a standard I/O error.
/// This is often used when interoperating with code that expects standard I/O errors.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io { source, .. } => source,
            Error::InvalidArgument(_) => Self::new(std::io::ErrorKind::InvalidInput, value),
            Error::InvalidData(_) => Self::new(std::io::ErrorKind::InvalidData, value),
            Error::Unsupported { .. } => Self::new(std::io::ErrorKind::Unsupported, value),
            _ => Self::other(value),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn io_variant_unwraps_into_std_error() {
        let e = Error::io(
            IoOperation::Sync,
            std::io::Error::new(ErrorKind::PermissionDenied, "nope"),
        );

        assert_eq!(e.to_string(), "I/O failure during sync");

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::PermissionDenied);
        assert_eq!(io_error.to_string(), "nope");
    }

    #[test]
    fn logical_errors_map_to_io_kinds() {
        let io_error: std::io::Error = Error::invalid_argument("bad").into();
        assert_eq!(io_error.kind(), ErrorKind::InvalidInput);

        let io_error: std::io::Error = Error::unsupported(StoreKind::File, "array").into();
        assert_eq!(io_error.kind(), ErrorKind::Unsupported);

        let io_error: std::io::Error = Error::out_of_bounds(1, 2, 2).into();
        assert_eq!(io_error.kind(), ErrorKind::Other);
    }

    #[test]
    fn messages_identify_the_offending_access() {
        assert_eq!(
            Error::out_of_bounds(10, 4, 12).to_string(),
            "out of bounds: 4 bytes at offset 10 exceed bound 12"
        );
        assert_eq!(
            Error::CapacityExceeded {
                required: 16,
                max_capacity: 8
            }
            .to_string(),
            "capacity exceeded: 16 bytes required but maximum capacity is 8"
        );
        assert_eq!(
            Error::unsupported(StoreKind::Mapped, "array").to_string(),
            "array is not supported by mapped store"
        );
    }
}
