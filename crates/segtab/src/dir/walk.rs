use core::ops::Range;
use core::ptr::NonNull;

use mutex_api::Mutex;

use super::{Dir, Directory, WalkFlags};
use crate::{addr::VirtAddr, page_source::PageSource, pool::PoolState};

impl<M, S, const N: usize, const NPTEPG: usize, const THREE_LEVEL: bool, const LEAF_CACHE_CAP: usize>
    Dir<M, S, N, NPTEPG, THREE_LEVEL, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    /// Walks `range`, invoking `callback` once per populated leaf
    /// sub-range with the leaf's base pointer.
    ///
    /// Unpopulated sub-ranges (no leaf reserved yet) are skipped without a
    /// callback; this crate never allocates on this path. `range.end`
    /// acts as the address-space boundary: a segment that would otherwise
    /// extend past it, or wrap around to zero, is clamped to `range.end`.
    ///
    /// Not internally synchronized against a concurrent [`Dir::reserve`]
    /// or [`Dir::destroy`] on the same directory; the caller is
    /// responsible for excluding those.
    pub fn walk(
        &self,
        directory: &Directory<N>,
        range: Range<VirtAddr>,
        flags: WalkFlags,
        mut callback: impl FnMut(VirtAddr, VirtAddr, NonNull<u8>, WalkFlags),
    ) {
        let nbseg = NPTEPG * S::PAGE_SIZE;
        let mut va = range.start;

        while va < range.end {
            let seg_base = VirtAddr::new(va.addr() - (va.addr() % nbseg));
            let mut next = seg_base.wrapping_add(nbseg);
            if next.addr() == 0 || next.addr() > range.end.addr() {
                next = range.end;
            }

            if let Some(pte) = self.lookup(directory, va) {
                let idx = self.decompose(va);
                let stride = self.pte_stride();
                let leaf_base =
                    unsafe { NonNull::new_unchecked(pte.as_ptr().sub(idx.pte * stride)) };
                callback(va, next, leaf_base, flags);
            }

            va = next;
        }
    }
}

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
    fn walk_skips_unpopulated_segments() {
        let (dir, directory) = new_dir(16);
        let mut hits = 0;
        dir.walk(
            &directory,
            VirtAddr::new(0)..VirtAddr::new(NPTEPG * PAGE_SIZE * 4),
            WalkFlags::default(),
            |_, _, _, _| hits += 1,
        );
        assert_eq!(hits, 0);
    }

    #[test]
    fn walk_visits_each_reserved_segment_once() {
        let (dir, directory) = new_dir(16);
        let nbseg = NPTEPG * PAGE_SIZE;

        dir.reserve(&directory, VirtAddr::new(0), ReserveFlags::empty())
            .unwrap();
        dir.reserve(&directory, VirtAddr::new(nbseg * 2), ReserveFlags::empty())
            .unwrap();

        let mut seen = Vec::new();
        dir.walk(
            &directory,
            VirtAddr::new(0)..VirtAddr::new(nbseg * 4),
            WalkFlags::default(),
            |start, end, _leaf, _flags| seen.push((start, end)),
        );

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (VirtAddr::new(0), VirtAddr::new(nbseg)));
        assert_eq!(
            seen[1],
            (VirtAddr::new(nbseg * 2), VirtAddr::new(nbseg * 3))
        );
    }

    #[test]
    fn walk_clamps_last_segment_to_range_end() {
        let (dir, directory) = new_dir(16);
        let nbseg = NPTEPG * PAGE_SIZE;

        dir.reserve(&directory, VirtAddr::new(0), ReserveFlags::empty())
            .unwrap();

        let end = VirtAddr::new(nbseg / 2);
        let mut seen = Vec::new();
        dir.walk(
            &directory,
            VirtAddr::new(0)..end,
            WalkFlags::default(),
            |start, seg_end, _leaf, _flags| seen.push((start, seg_end)),
        );

        assert_eq!(seen, vec![(VirtAddr::new(0), end)]);
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
    fn three_level_walk_visits_leaves_across_separate_xseg_children() {
        let (dir, directory) = new_three_level_dir(64);
        let nbseg = NPTEPG * PAGE_SIZE;
        let nbxseg = nbseg * SEGTABSIZE;

        // one leaf under xseg 0, one under xseg 1 — the walk must cross
        // the xseg boundary and still find both.
        let va_a = VirtAddr::new(nbseg);
        let va_b = VirtAddr::new(nbxseg + nbseg * 2);
        dir.reserve(&directory, va_a, ReserveFlags::empty()).unwrap();
        dir.reserve(&directory, va_b, ReserveFlags::empty()).unwrap();

        let mut seen = Vec::new();
        dir.walk(
            &directory,
            VirtAddr::new(0)..VirtAddr::new(nbxseg * 2),
            WalkFlags::default(),
            |start, end, _leaf, _flags| seen.push((start, end)),
        );

        assert_eq!(seen, vec![
            (va_a, VirtAddr::new(nbseg * 2)),
            (va_b, VirtAddr::new(nbxseg + nbseg * 3)),
        ]);
    }
}
