//! Free-list pool for directory nodes, and the leaf-page cache that rides
//! along on the same lock.

use core::ptr::NonNull;

use arrayvec::ArrayVec;
use mutex_api::Mutex;

use crate::{page_source::PageSource, segtab::Segtab, trace::trace};

/// Data guarded by a [`Pool`]'s mutex: the segtab free list and the bounded
/// leaf-page cache.
///
/// Setting `LEAF_CACHE_CAP` to `0` disables the leaf cache entirely: the
/// `ArrayVec` is always full, so [`Pool::try_pop_leaf`] always misses and
/// [`Pool::push_leaf`] always spills straight back to the page source. This
/// is the idiomatic stand-in for the reference implementation's
/// `PMAP_PTP_CACHE` build-time switch.
pub struct PoolState<S, const N: usize, const LEAF_CACHE_CAP: usize>
where
    S: PageSource,
{
    free_segtab: Option<NonNull<Segtab<N>>>,
    leaf_cache: ArrayVec<S::Page, LEAF_CACHE_CAP>,
}

// SAFETY: `free_segtab` points into pages owned by the `PageSource` that
// fed this pool, never aliased outside it; `S::Page: Send` covers the
// cached leaf identities.
unsafe impl<S, const N: usize, const LEAF_CACHE_CAP: usize> Send
    for PoolState<S, N, LEAF_CACHE_CAP>
where
    S: PageSource,
    S::Page: Send,
{
}

impl<S, const N: usize, const LEAF_CACHE_CAP: usize> PoolState<S, N, LEAF_CACHE_CAP>
where
    S: PageSource,
{
    fn new() -> Self {
        Self {
            free_segtab: None,
            leaf_cache: ArrayVec::new(),
        }
    }
}

/// Owns the pool's mutex and serves both the directory-node free list and
/// the leaf-page cache through it, matching the reference implementation's
/// single `pmap_segtab_lock` covering both structures.
pub struct Pool<M, S, const N: usize, const LEAF_CACHE_CAP: usize>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    state: M,
}

impl<M, S, const N: usize, const LEAF_CACHE_CAP: usize> Pool<M, S, N, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "SEGTABSIZE must be a power of two");
        Self {
            state: M::new(PoolState::new()),
        }
    }

    /// Returns a zeroed directory node, blocking on `source` for a fresh
    /// page if the free list is empty.
    pub fn get_segtab(&self, source: &S) -> NonNull<Segtab<N>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(stb) = state.free_segtab.take() {
                    state.free_segtab = unsafe { stb.as_ref().free_link() };
                    unsafe { stb.as_ref().set_free_link(None) };
                    return stb;
                }
            }

            trace!("segtab: pool empty, requesting page");
            let Some(page) = source.page_alloc() else {
                source.wait_for_memory("segtab");
                continue;
            };
            return self.carve_page(source, page);
        }
    }

    /// Dices a freshly allocated page into `PAGE_SIZE / size_of::<Segtab<N>>()`
    /// nodes, links every node but the first onto the free list with a
    /// single lock acquisition, and returns the first node directly.
    fn carve_page(&self, source: &S, page: S::Page) -> NonNull<Segtab<N>> {
        let vaddr = source.map_poolpage(page);
        debug_assert_eq!(vaddr.addr().get() % align_of::<Segtab<N>>(), 0);

        let stb_size = size_of::<Segtab<N>>();
        assert!(stb_size <= S::PAGE_SIZE, "segtab larger than a page");
        let count = S::PAGE_SIZE / stb_size;

        let base = vaddr.cast::<Segtab<N>>();
        unsafe {
            base.write(Segtab::zeroed());
        }
        let first = base;

        if count > 1 {
            let mut head = None;
            let mut tail = None;
            for i in (1..count).rev() {
                let stb = unsafe { NonNull::new_unchecked(base.as_ptr().add(i)) };
                unsafe {
                    stb.write(Segtab::zeroed());
                    stb.as_ref().set_free_link(head);
                }
                head = Some(stb);
                tail.get_or_insert(stb);
            }

            let mut state = self.state.lock();
            unsafe {
                tail.unwrap().as_ref().set_free_link(state.free_segtab);
            }
            state.free_segtab = head;
        }

        first
    }

    /// Returns a directory node to the pool.
    ///
    /// `stb` must have every slot null; the node still physically owns the
    /// page it lives on, which is never given back to the page source.
    pub fn put_segtab(&self, stb: NonNull<Segtab<N>>) {
        debug_assert!(
            unsafe { stb.as_ref() }.is_all_null(),
            "returned segtab must have every slot cleared"
        );
        let mut state = self.state.lock();
        unsafe { stb.as_ref().set_free_link(state.free_segtab) };
        state.free_segtab = Some(stb);
    }

    /// Pops a leaf page out of the cache, if any is idle there.
    pub fn try_pop_leaf(&self) -> Option<S::Page> {
        self.state.lock().leaf_cache.pop()
    }

    /// Offers an idle leaf page to the cache; if the cache is full (or
    /// disabled), it is returned straight to `source`.
    ///
    /// `page` must be unmapped and its contents all-zero.
    pub fn push_leaf(&self, source: &S, page: S::Page) {
        let mut state = self.state.lock();
        if let Err(err) = state.leaf_cache.try_push(page) {
            drop(state);
            source.page_free(err.element());
        }
    }
}

impl<M, S, const N: usize, const LEAF_CACHE_CAP: usize> Default for Pool<M, S, N, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutexImpl;

    use super::*;
    use crate::page_source::test_support::HeapPageSource;

    struct StdMutex<T>(StdMutexImpl<T>);
    struct StdMutexGuard<'a, T>(std::sync::MutexGuard<'a, T>);

    impl<T> mutex_api::Mutex for StdMutex<T> {
        type Data = T;
        type Guard<'a>
            = StdMutexGuard<'a, T>
        where
            Self: 'a;

        fn new(data: Self::Data) -> Self {
            Self(StdMutexImpl::new(data))
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

    const PAGE_SIZE: usize = 256;
    const SEGTABSIZE: usize = 8;

    type TestPool = Pool<StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 4>>, HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 4>;

    #[test]
    fn get_segtab_returns_zeroed_node() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool = TestPool::new();

        let stb = pool.get_segtab(&source);
        assert!(unsafe { stb.as_ref() }.is_all_null());
    }

    #[test]
    fn put_then_get_recycles_same_node() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool = TestPool::new();

        let stb = pool.get_segtab(&source);
        pool.put_segtab(stb);
        let stb2 = pool.get_segtab(&source);
        assert_eq!(stb, stb2);
    }

    #[test]
    fn a_single_page_yields_multiple_free_nodes() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool = TestPool::new();

        let expected = PAGE_SIZE / size_of::<Segtab<SEGTABSIZE>>();
        assert!(expected > 1);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..expected {
            let stb = pool.get_segtab(&source);
            assert!(seen.insert(stb));
        }
    }

    #[test]
    fn leaf_cache_round_trips_below_capacity() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool = TestPool::new();

        assert!(pool.try_pop_leaf().is_none());
        let page = source.page_alloc().unwrap();
        pool.push_leaf(&source, page);
        assert_eq!(pool.try_pop_leaf(), Some(page));
        assert!(pool.try_pop_leaf().is_none());
    }

    #[test]
    fn leaf_cache_spills_to_source_when_full() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool: Pool<StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 1>>, HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 1> =
            Pool::new();

        let a = source.page_alloc().unwrap();
        let b = source.page_alloc().unwrap();
        pool.push_leaf(&source, a);
        pool.push_leaf(&source, b);

        assert_eq!(source.free_count(), 16 - 2 + 1);
    }

    #[test]
    fn disabled_leaf_cache_always_spills() {
        let source = HeapPageSource::<PAGE_SIZE>::new(16);
        let pool: Pool<StdMutex<PoolState<HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 0>>, HeapPageSource<PAGE_SIZE>, SEGTABSIZE, 0> =
            Pool::new();

        let page = source.page_alloc().unwrap();
        pool.push_leaf(&source, page);
        assert!(pool.try_pop_leaf().is_none());
        assert_eq!(source.free_count(), 16);
    }
}
