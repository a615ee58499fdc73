use core::{
    ptr::{self, NonNull},
    sync::atomic::Ordering,
};

use mutex_api::Mutex;

use super::{Dir, Directory, TeardownFlags};
use crate::{addr::VirtAddr, page_source::PageSource, pool::PoolState, segtab::Segtab, trace::trace};

impl<M, S, const N: usize, const NPTEPG: usize, const THREE_LEVEL: bool, const LEAF_CACHE_CAP: usize>
    Dir<M, S, N, NPTEPG, THREE_LEVEL, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    /// Tears down `directory`, returning every directory node and leaf page
    /// it owns to the pool, and clearing its root.
    ///
    /// If `callback` is given, it is invoked once per populated leaf page
    /// (with that segment's base address, the leaf's pointer, and `flags`)
    /// before the leaf is released, and the top-level node is *not* freed
    /// (the caller keeps reusing it), mirroring the reference
    /// implementation's `pmap_segtab_destroy` keeping the root only when a
    /// callback is supplied. Every directory node below the root is always
    /// freed.
    ///
    /// After this call, `directory` is uninitialized again; a fresh call to
    /// [`Dir::init_directory`] is required before reuse, unless a callback
    /// was supplied (the root stays live).
    pub fn destroy<F>(&self, directory: &mut Directory<N>, callback: Option<&mut F>, flags: TeardownFlags)
    where
        F: FnMut(VirtAddr, NonNull<u8>, TeardownFlags),
    {
        let root = directory.root().swap(ptr::null_mut(), Ordering::AcqRel);
        let Some(root) = NonNull::new(root) else {
            return;
        };

        let nbseg = NPTEPG * S::PAGE_SIZE;
        let vinc = if THREE_LEVEL { nbseg * N } else { nbseg };
        let free_stb = callback.is_none();

        self.release(root, free_stb, callback, flags, directory.min_addr(), vinc, nbseg);

        if !free_stb {
            directory.root().store(root.as_ptr(), Ordering::Release);
        }
    }

    /// Recursively releases `stb` and everything beneath it.
    ///
    /// `vinc` is the virtual address span one slot of `stb` covers; when it
    /// is larger than `nbseg` (one leaf page's span), `stb`'s slots hold
    /// child directory nodes and this function recurses, mirroring the
    /// reference implementation's `vinc > NBSEG` recursion test. Otherwise
    /// `stb`'s slots hold leaf pages directly.
    ///
    /// The loop starts at slot `(va / vinc) mod N` rather than slot 0, so a
    /// directory whose `min_addr` lies part-way into the root (the usual
    /// case when the kernel and user portions of the address space share a
    /// root segtab) skips the kernel's slots instead of visiting and
    /// finding them empty.
    fn release<F>(
        &self,
        stb: NonNull<Segtab<N>>,
        free_stb: bool,
        mut callback: Option<&mut F>,
        flags: TeardownFlags,
        va: VirtAddr,
        vinc: usize,
        nbseg: usize,
    ) where
        F: FnMut(VirtAddr, NonNull<u8>, TeardownFlags),
    {
        let start = (va.addr() / vinc) % N;
        let mut va = va;
        for i in start..N {
            let slot = unsafe { stb.as_ref().slot(i) };
            let child = slot.swap(ptr::null_mut(), Ordering::AcqRel);

            if let Some(child) = NonNull::new(child) {
                if vinc > nbseg {
                    self.release(
                        child.cast(),
                        true,
                        callback.as_mut().map(|cb| &mut **cb),
                        flags,
                        va,
                        vinc / N,
                        nbseg,
                    );
                } else {
                    if let Some(cb) = callback.as_mut() {
                        cb(va, child, flags);
                    }
                    debug_assert_leaf_zeroed::<S>(child);
                    let page = self.source.unmap_poolpage(child);
                    self.pool.push_leaf(&self.source, page);
                }
            }

            va = va.wrapping_add(vinc);
        }

        if free_stb {
            trace!("segtab: freeing directory node on teardown");
            self.pool.put_segtab(stb);
        }
    }
}

/// Checks (debug builds only) that a leaf page about to be released holds no
/// live mappings, mirroring the reference implementation's `pmap_check_ptes`
/// assertion.
#[cfg(debug_assertions)]
fn debug_assert_leaf_zeroed<S: PageSource>(leaf: NonNull<u8>) {
    let bytes = unsafe { core::slice::from_raw_parts(leaf.as_ptr(), S::PAGE_SIZE) };
    debug_assert!(
        bytes.iter().all(|&b| b == 0),
        "leaf page released with live PTEs still set"
    );
}

#[cfg(not(debug_assertions))]
fn debug_assert_leaf_zeroed<S: PageSource>(_leaf: NonNull<u8>) {}

#[cfg(test)]
mod tests {
    use mutex_api::Mutex as _;

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

    type TestDir = Dir<
        StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 4>>,
        HeapPageSource<PAGE_SIZE>,
        SEGTABSIZE,
        NPTEPG,
        false,
        4,
    >;

    fn new_dir(pages: usize) -> (TestDir, Directory<SEGTABSIZE>) {
        let dir = TestDir::new(HeapPageSource::new(pages));
        let directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);
        (dir, directory)
    }

    #[test]
    fn destroy_without_callback_frees_root_and_clears_it() {
        let (dir, mut directory) = new_dir(16);
        let nbseg = NPTEPG * PAGE_SIZE;
        dir.reserve(&directory, VirtAddr::new(0), ReserveFlags::empty())
            .unwrap();
        dir.reserve(&directory, VirtAddr::new(nbseg * 3), ReserveFlags::empty())
            .unwrap();

        dir.destroy::<fn(VirtAddr, NonNull<u8>, TeardownFlags)>(&mut directory, None, TeardownFlags::default());

        assert!(directory.root_ptr().is_none());
    }

    #[test]
    fn destroy_returns_leaf_pages_to_the_source() {
        // leaf cache disabled so a released leaf page goes straight back to
        // the source, where `free_count` can observe it.
        type NoLeafCacheDir = Dir<
            StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 0>>,
            HeapPageSource<PAGE_SIZE>,
            SEGTABSIZE,
            NPTEPG,
            false,
            0,
        >;

        let dir: NoLeafCacheDir = Dir::new(HeapPageSource::new(16));
        let mut directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);

        let nbseg = NPTEPG * PAGE_SIZE;
        dir.reserve(&directory, VirtAddr::new(0), ReserveFlags::empty())
            .unwrap();
        dir.reserve(&directory, VirtAddr::new(nbseg * 2), ReserveFlags::empty())
            .unwrap();

        let before_destroy = dir.source().free_count();
        dir.destroy::<fn(VirtAddr, NonNull<u8>, TeardownFlags)>(&mut directory, None, TeardownFlags::default());

        assert_eq!(dir.source().free_count(), before_destroy + 2);
    }

    #[test]
    fn destroy_invokes_callback_once_per_leaf_and_keeps_root() {
        let (dir, mut directory) = new_dir(16);
        let nbseg = NPTEPG * PAGE_SIZE;
        let va_a = VirtAddr::new(0);
        let va_b = VirtAddr::new(nbseg * 5);
        dir.reserve(&directory, va_a, ReserveFlags::empty()).unwrap();
        dir.reserve(&directory, va_b, ReserveFlags::empty()).unwrap();

        let mut visited = Vec::new();
        {
            let mut callback = |va: VirtAddr, _leaf: NonNull<u8>, _flags: TeardownFlags| {
                visited.push(va);
            };
            dir.destroy(&mut directory, Some(&mut callback), TeardownFlags::default());
        }

        visited.sort_by_key(VirtAddr::addr);
        assert_eq!(visited, vec![va_a, va_b]);
        assert!(directory.root_ptr().is_some(), "root stays live when a callback is given");
    }

    #[test]
    fn destroy_on_empty_directory_is_a_no_op() {
        let (dir, mut directory) = new_dir(16);
        dir.destroy::<fn(VirtAddr, NonNull<u8>, TeardownFlags)>(&mut directory, None, TeardownFlags::default());
        assert!(directory.root_ptr().is_none());
    }

    #[test]
    fn destroy_skips_slots_below_min_addr() {
        // A directory whose min_addr starts part-way into the root must
        // never visit the slots below it, even when they are populated: the
        // kernel portion of the root segtab is left untouched.
        let dir = TestDir::new(HeapPageSource::new(16));
        let nbseg = NPTEPG * PAGE_SIZE;

        // Populate index 0 through the directory's own reserve path while
        // min_addr is still 0, then switch to a directory view whose
        // min_addr starts at index 3 and destroy through that view.
        let mut directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);
        dir.reserve(&directory, VirtAddr::new(0), ReserveFlags::empty())
            .unwrap();
        dir.reserve(&directory, VirtAddr::new(nbseg * 4), ReserveFlags::empty())
            .unwrap();

        let root = directory.root().load(Ordering::Acquire);
        let mut scoped = Directory::new(VirtAddr::new(nbseg * 3));
        scoped.root().store(root, Ordering::Release);

        let mut visited = Vec::new();
        {
            let mut callback = |va: VirtAddr, _leaf: NonNull<u8>, _flags: TeardownFlags| {
                visited.push(va);
            };
            dir.destroy(&mut scoped, Some(&mut callback), TeardownFlags::default());
        }

        assert_eq!(visited, vec![VirtAddr::new(nbseg * 4)]);

        // index 0 was never visited, so it is still populated; clean it up
        // by hand so the page source's drop impl doesn't leak.
        let leaf = unsafe { NonNull::new(root).unwrap().as_ref() }.slot(0).load(Ordering::Acquire);
        assert!(!leaf.is_null(), "slot below min_addr must be left untouched");
        unsafe { (*root).slot(0).store(ptr::null_mut(), Ordering::Release) };
    }

    type ThreeLevelTestDir = Dir<
        StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 4>>,
        HeapPageSource<PAGE_SIZE>,
        SEGTABSIZE,
        NPTEPG,
        true,
        4,
    >;

    fn new_three_level_dir(pages: usize) -> (ThreeLevelTestDir, Directory<SEGTABSIZE>) {
        let dir = ThreeLevelTestDir::new(HeapPageSource::new(pages));
        let directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);
        (dir, directory)
    }

    #[test]
    fn three_level_destroy_without_callback_frees_root_and_clears_it() {
        let (dir, mut directory) = new_three_level_dir(64);
        let nbseg = NPTEPG * PAGE_SIZE;
        let nbxseg = nbseg * SEGTABSIZE;
        dir.reserve(&directory, VirtAddr::new(nbseg), ReserveFlags::empty())
            .unwrap();
        dir.reserve(&directory, VirtAddr::new(nbxseg + nbseg * 2), ReserveFlags::empty())
            .unwrap();

        dir.destroy::<fn(VirtAddr, NonNull<u8>, TeardownFlags)>(&mut directory, None, TeardownFlags::default());

        assert!(directory.root_ptr().is_none());
    }

    #[test]
    fn three_level_destroy_recurses_through_xseg_children_and_frees_everything() {
        // leaf cache disabled so every released leaf page goes straight
        // back to the source, where `free_count` can observe it.
        type NoLeafCacheThreeLevelDir = Dir<
            StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 0>>,
            HeapPageSource<PAGE_SIZE>,
            SEGTABSIZE,
            NPTEPG,
            true,
            0,
        >;

        let dir: NoLeafCacheThreeLevelDir = Dir::new(HeapPageSource::new(64));
        let mut directory = Directory::new(VirtAddr::new(0));
        dir.init_directory(&directory);

        let nbseg = NPTEPG * PAGE_SIZE;
        let nbxseg = nbseg * SEGTABSIZE;

        // two leaves under two distinct xseg children: exercises the
        // `vinc > nbseg` recursive branch of `release` twice over, each
        // recursion freeing its own xseg child segtab afterwards.
        let va_a = VirtAddr::new(nbseg * 2);
        let va_b = VirtAddr::new(nbxseg + nbseg * 5);
        dir.reserve(&directory, va_a, ReserveFlags::empty()).unwrap();
        dir.reserve(&directory, va_b, ReserveFlags::empty()).unwrap();

        let before_destroy = dir.source().free_count();

        let mut visited = Vec::new();
        {
            let mut callback = |va: VirtAddr, _leaf: NonNull<u8>, _flags: TeardownFlags| {
                visited.push(va);
            };
            dir.destroy(&mut directory, Some(&mut callback), TeardownFlags::default());
        }

        visited.sort_by_key(VirtAddr::addr);
        assert_eq!(visited, vec![va_a, va_b]);
        assert!(directory.root_ptr().is_some(), "root stays live when a callback is given");
        assert_eq!(dir.source().free_count(), before_destroy + 2);
    }
}
