// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::store::{SharedStore, Store, StoreKind, WeakStore, check_range};
use crate::{ByteOrder, Error, Result};

/// A window `[offset, offset + len)` of a root store, without a storage technology of its own.
///
/// The view holds only a non-owning reference to the root. Every access resolves the root at the
/// time of the call and fails with [`Error::Closed`] once the root has been dropped. Views are
/// created through [`SharedStore::view()`], which resolves views of views to the root so that
/// every view is exactly one hop away from the owner of the bytes.
#[derive(Debug)]
pub struct StoreView {
    root: WeakStore,
    offset: usize,
    len: usize,
    kind: StoreKind,
    order: ByteOrder,
    closed: bool,
}

impl StoreView {
    pub(crate) fn new(root: WeakStore, offset: usize, len: usize) -> Self {
        let (kind, order) = root.upgrade().map_or((StoreKind::Heap, ByteOrder::default()), |owner| {
            let store = owner.lock();
            (store.kind(), store.order())
        });

        Self {
            root,
            offset,
            len,
            kind,
            order,
            closed: false,
        }
    }

    /// The owner of the bytes, if it is still alive.
    #[must_use]
    pub fn root(&self) -> Option<SharedStore> {
        self.root.upgrade()
    }

    /// The offset of the window within the root store.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn resolve(&self) -> Result<SharedStore> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.root.upgrade().ok_or(Error::Closed)
    }
}

impl Store for StoreView {
    /// The kind of the root store.
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn size(&self) -> usize {
        self.len
    }

    fn order(&self) -> ByteOrder {
        self.order
    }

    fn read(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_range(offset, dst.len(), self.len)?;
        self.resolve()?.lock().read(self.offset + offset, dst)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        check_range(offset, src.len(), self.len)?;
        self.resolve()?.lock().write(self.offset + offset, src)
    }

    fn resize(&mut self, _new_size: usize) -> Result<()> {
        Err(Error::unsupported(self.kind, "resizing a view"))
    }

    fn flush(&mut self) -> Result<()> {
        self.resolve()?.lock().flush()
    }

    /// Detaches the view. The root store is left open.
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn view_root(&self) -> Option<(&WeakStore, usize)> {
        Some((&self.root, self.offset))
    }

    fn copy_within(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        check_range(from, len, self.len)?;
        check_range(to, len, self.len)?;
        self.resolve()?.lock().copy_within(self.offset + from, self.offset + to, len)
    }

    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        check_range(offset, len, self.len)?;
        self.resolve()?.lock().zero(self.offset + offset, len)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HeapStore, NativeStore, StoreExt, SwappedStore};

    #[test]
    fn view_translates_offsets() {
        let root = SharedStore::new(HeapStore::new(16).unwrap());
        let mut view = root.view(4, 8).unwrap();

        assert_eq!(view.size(), 8);
        assert_eq!(view.offset(), 4);
        assert_eq!(view.kind(), StoreKind::Heap);

        view.put_num(0, 0xDEAD_BEEF_u32).unwrap();
        assert_eq!(root.lock().get_num::<u32>(4).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn view_rejects_access_outside_window() {
        let root = SharedStore::new(HeapStore::new(16).unwrap());
        let mut view = root.view(4, 8).unwrap();

        assert!(matches!(
            view.write(6, &[1, 2, 3]),
            Err(Error::OutOfBounds {
                offset: 6,
                length: 3,
                bound: 8
            })
        ));
        assert_eq!(root.lock().heap_array().unwrap(), &[0; 16]);
    }

    #[test]
    fn views_of_views_are_flattened() {
        let root = SharedStore::new(NativeStore::new(32).unwrap());
        let outer = SharedStore::new(root.view(8, 16).unwrap());
        let mut inner = outer.view(4, 4).unwrap();

        assert_eq!(inner.offset(), 12);
        assert!(inner.root().unwrap().ptr_eq(&root));

        // The intermediate view can go away without affecting the flattened one.
        drop(outer);
        inner.put_byte(0, 7).unwrap();
        assert_eq!(root.lock().get_byte(12).unwrap(), 7);
    }

    #[test]
    fn access_after_root_dropped_fails() {
        let root = SharedStore::new(HeapStore::new(8).unwrap());
        let mut view = root.view(0, 8).unwrap();
        drop(root);

        assert!(view.root().is_none());
        assert!(matches!(view.get_byte(0), Err(Error::Closed)));
    }

    #[test]
    fn closing_view_leaves_root_open() {
        let root = SharedStore::new(HeapStore::new(8).unwrap());
        let mut view = root.view(0, 4).unwrap();

        view.close().unwrap();
        assert!(view.is_closed());
        assert!(matches!(view.put_byte(0, 1), Err(Error::Closed)));
        assert!(!root.lock().is_closed());
    }

    #[test]
    fn view_inherits_root_order_and_cannot_resize() {
        let root = SharedStore::new(SwappedStore::new(HeapStore::new(8).unwrap()));
        let mut view = root.view(2, 4).unwrap();

        assert_eq!(view.order(), ByteOrder::LittleEndian);
        view.put_num(0, 0x0102_u16).unwrap();
        assert_eq!(root.lock().get_byte(2).unwrap(), 0x02);

        assert!(matches!(view.resize(2), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn copy_and_zero_stay_inside_window() {
        let root = SharedStore::new(HeapStore::wrap(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        let mut view = root.view(2, 4).unwrap();

        view.copy_within(1, 0, 3).unwrap();
        view.zero(3, 1).unwrap();
        view.zero(3, 2).unwrap_err();

        assert_eq!(root.lock().heap_array().unwrap(), &[1, 2, 4, 5, 6, 0, 7, 8]);
    }
}
