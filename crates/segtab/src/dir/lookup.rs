use core::{ptr::NonNull, sync::atomic::Ordering};

use mutex_api::Mutex;

use super::{Dir, Directory, load_slot};
use crate::{addr::VirtAddr, page_source::PageSource, pool::PoolState};

impl<M, S, const N: usize, const NPTEPG: usize, const THREE_LEVEL: bool, const LEAF_CACHE_CAP: usize>
    Dir<M, S, N, NPTEPG, THREE_LEVEL, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    /// Finds the PTE slot for `va`, without allocating anything.
    ///
    /// Returns `None` if any intermediate directory node, or the leaf page,
    /// on the path to `va` has not yet been reserved.
    ///
    /// `directory` must have been initialized with
    /// [`init_directory`](Dir::init_directory) and `va` must not be below
    /// `directory.min_addr()`.
    #[must_use]
    pub fn lookup(&self, directory: &Directory<N>, va: VirtAddr) -> Option<NonNull<u8>> {
        debug_assert!(va >= directory.min_addr());

        let idx = self.decompose(va);
        let root = directory.root().load(Ordering::Acquire);
        debug_assert!(!root.is_null(), "directory not initialized");
        let mut stb = unsafe { NonNull::new_unchecked(root) };

        if THREE_LEVEL {
            stb = NonNull::new(load_slot(stb, idx.xseg))?.cast();
        }

        let leaf = NonNull::new(load_slot(stb, idx.seg))?;

        let stride = self.pte_stride();
        Some(unsafe { NonNull::new_unchecked(leaf.as_ptr().add(idx.pte * stride)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dir::ReserveFlags, page_source::test_support::HeapPageSource};

    struct StdMutex<T>(std::sync::Mutex<T>);
    struct StdMutexGuard<'a, T>(std::sync::MutexGuard<'a, T>);

    impl<T> mutex_api::Mutex for StdMutex<T> {
        type Data = T;
        type Guard<'a>
            = StdMutexGuard<'a, T>
        where
            Self: 'a;

        fn new(data: Self::Data) -> Self {
            Self(std::sync::Mutex::new(data))
        }

        fn lock(&self) -> Self::Guard<'_> {
            StdMutexGuard(self.0.lock().unwrap())
        }
    }

    impl<T> core::ops::Deref for StdMutexGuard<'_, T> {
        type Target = T;
        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl<T> core::ops::DerefMut for StdMutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }

    const PAGE_SIZE: usize = 512;
    const SEGTABSIZE: usize = 8;
    const NPTEPG: usize = 8;

    type ThreeLevelTestDir = Dir<
        StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 4>>,
        HeapPageSource<PAGE_SIZE>,
        SEGTABSIZE,
        NPTEPG,
        true,
        4,
    >;

    #[test]
    fn three_level_lookup_misses_when_xseg_child_unallocated() {
        let dir = ThreeLevelTestDir::new(HeapPageSource::new(64));
        let directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);

        let nbxseg = NPTEPG * PAGE_SIZE * SEGTABSIZE;
        assert!(dir.lookup(&directory, VirtAddr::new(nbxseg)).is_none());
    }

    #[test]
    fn three_level_lookup_finds_slot_reserved_under_nonzero_xseg() {
        let dir = ThreeLevelTestDir::new(HeapPageSource::new(64));
        let directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);

        let nbxseg = NPTEPG * PAGE_SIZE * SEGTABSIZE;
        let va = VirtAddr::new(nbxseg + 0x80);
        let reserved = dir.reserve(&directory, va, ReserveFlags::empty()).unwrap();

        assert_eq!(dir.lookup(&directory, va), Some(reserved));
    }
}
