//! The boundary between this crate and the physical-memory subsystem.

use core::ptr::NonNull;

/// Supplies and reclaims page-sized, zeroed, physically backed memory on
/// behalf of the directory manager.
///
/// `Self::Page` is the opaque identity of a physical page: for the segtab
/// pool (directory nodes) a page is handed out once and never unmapped
/// again, while for the leaf-page cache a cached entry is an *unmapped*
/// `Page`, re-mapped through [`map_poolpage`](PageSource::map_poolpage) only
/// when it is reused.
pub trait PageSource {
    /// Physical page identity.
    type Page: Copy + Eq;

    /// Size, in bytes, of a page. Must be a power of two.
    const PAGE_SIZE: usize;

    /// Allocates one zeroed physical page, or `None` if none is currently
    /// available.
    fn page_alloc(&self) -> Option<Self::Page>;

    /// Releases a physical page previously obtained from this source.
    ///
    /// The page must not still be mapped (see
    /// [`unmap_poolpage`](PageSource::unmap_poolpage)).
    fn page_free(&self, page: Self::Page);

    /// Maps `page` into the kernel's directly addressable window and
    /// returns the resulting page-aligned pointer.
    fn map_poolpage(&self, page: Self::Page) -> NonNull<u8>;

    /// Reverses [`map_poolpage`](PageSource::map_poolpage), returning the
    /// physical page identity and leaving it unmapped.
    fn unmap_poolpage(&self, vaddr: NonNull<u8>) -> Self::Page;

    /// Called when [`page_alloc`](PageSource::page_alloc) returns `None` and
    /// the caller cannot proceed without a page. Implementations block
    /// until memory is likely to become available, or never return.
    fn wait_for_memory(&self, tag: &'static str);
}

/// A hosted mock [`PageSource`] backed by a fixed heap arena, used by every
/// `#[cfg(test)]` module in this crate in place of a real physical
/// allocator.
#[cfg(test)]
pub(crate) mod test_support {
    use core::ptr::NonNull;
    use std::{
        alloc::{self, Layout},
        sync::Mutex,
        vec::Vec,
    };

    use super::PageSource;

    pub(crate) struct HeapPageSource<const PAGE_SIZE: usize> {
        base: *mut u8,
        layout: Layout,
        free: Mutex<Vec<usize>>,
    }

    // SAFETY: `base` points at a heap allocation owned solely by this
    // struct; all access goes through the `Mutex`-guarded free list or
    // through pages the caller has exclusively checked out.
    unsafe impl<const PAGE_SIZE: usize> Send for HeapPageSource<PAGE_SIZE> {}
    unsafe impl<const PAGE_SIZE: usize> Sync for HeapPageSource<PAGE_SIZE> {}

    impl<const PAGE_SIZE: usize> HeapPageSource<PAGE_SIZE> {
        pub(crate) fn new(pages: usize) -> Self {
            let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
            let base = unsafe { alloc::alloc_zeroed(layout) };
            assert!(!base.is_null(), "test arena allocation failed");
            Self {
                base,
                layout,
                free: Mutex::new((0..pages).collect()),
            }
        }

        pub(crate) fn free_count(&self) -> usize {
            self.free.lock().unwrap().len()
        }
    }

    impl<const PAGE_SIZE: usize> Drop for HeapPageSource<PAGE_SIZE> {
        fn drop(&mut self) {
            unsafe { alloc::dealloc(self.base, self.layout) };
        }
    }

    impl<const PAGE_SIZE: usize> PageSource for HeapPageSource<PAGE_SIZE> {
        /// The page index doubles as the page's "physical address": it is
        /// the identity carried around by the pool and the leaf cache.
        type Page = usize;

        const PAGE_SIZE: usize = PAGE_SIZE;

        fn page_alloc(&self) -> Option<Self::Page> {
            let mut free = self.free.lock().unwrap();
            let index = free.pop()?;
            unsafe {
                self.base.add(index * PAGE_SIZE).write_bytes(0, PAGE_SIZE);
            }
            Some(index)
        }

        fn page_free(&self, page: Self::Page) {
            self.free.lock().unwrap().push(page);
        }

        fn map_poolpage(&self, page: Self::Page) -> NonNull<u8> {
            unsafe { NonNull::new_unchecked(self.base.add(page * PAGE_SIZE)) }
        }

        fn unmap_poolpage(&self, vaddr: NonNull<u8>) -> Self::Page {
            let offset = unsafe { vaddr.as_ptr().offset_from(self.base) };
            usize::try_from(offset).expect("pointer not from this arena") / PAGE_SIZE
        }

        fn wait_for_memory(&self, tag: &'static str) {
            panic!("test arena exhausted while waiting for {tag}");
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn alloc_free_round_trip() {
            let source = HeapPageSource::<64>::new(4);
            assert_eq!(source.free_count(), 4);

            let a = source.page_alloc().unwrap();
            let b = source.page_alloc().unwrap();
            assert_ne!(a, b);
            assert_eq!(source.free_count(), 2);

            source.page_free(a);
            assert_eq!(source.free_count(), 3);
        }

        #[test]
        fn map_unmap_poolpage_round_trips() {
            let source = HeapPageSource::<64>::new(4);
            let page = source.page_alloc().unwrap();
            let vaddr = source.map_poolpage(page);
            assert_eq!(vaddr.addr().get() % 64, 0);
            assert_eq!(source.unmap_poolpage(vaddr), page);
        }

        #[test]
        fn exhaustion_returns_none() {
            let source = HeapPageSource::<64>::new(1);
            assert!(source.page_alloc().is_some());
            assert!(source.page_alloc().is_none());
        }
    }
}
