//! The directory manager itself: the root handle ([`Directory`]) an
//! embedder stores inside its own address-space object, and the generic
//! [`Dir`] that knows how to walk, grow, and tear one down.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};

use bitflags::bitflags;
use mutex_api::Mutex;

use crate::{
    addr::{Indices, VirtAddr, decompose},
    page_source::PageSource,
    pool::{Pool, PoolState},
    segtab::Segtab,
};

mod lookup;
mod reserve;
mod teardown;
mod walk;

bitflags! {
    /// Flags accepted by [`Dir::reserve`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReserveFlags: u8 {
        /// Return [`SegtabError::NoFreePage`](crate::SegtabError::NoFreePage)
        /// instead of blocking when no page is available for directory
        /// growth.
        const CANFAIL = 1 << 0;
    }
}

/// Opaque flags forwarded verbatim to a [`Dir::walk`] callback.
///
/// This crate never inspects these bits; they exist so a caller can thread
/// context (e.g. "this is an unmap, not a protect") through the callback
/// without a second channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkFlags(pub usize);

/// Opaque flags forwarded verbatim to a [`Dir::destroy`] callback. See
/// [`WalkFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownFlags(pub usize);

/// The root of one address space's directory: a pointer to its top-level
/// [`Segtab`] plus the lowest virtual address the directory covers.
///
/// Embedders store a `Directory<N>` inside their own pmap-equivalent
/// struct. This crate touches nothing else about that struct.
pub struct Directory<const N: usize> {
    root: AtomicPtr<Segtab<N>>,
    min_addr: VirtAddr,
}

impl<const N: usize> Directory<N> {
    /// Creates an uninitialized directory for an address space whose
    /// lowest valid address is `min_addr`.
    ///
    /// The directory has no root node yet; call [`Dir::init_directory`]
    /// before any lookup, reserve, or walk.
    #[must_use]
    pub const fn new(min_addr: VirtAddr) -> Self {
        Self {
            root: AtomicPtr::new(ptr::null_mut()),
            min_addr,
        }
    }

    #[must_use]
    pub fn min_addr(&self) -> VirtAddr {
        self.min_addr
    }

    /// The currently published root pointer, or `None` before
    /// initialization (or after [`Dir::destroy`]).
    #[must_use]
    pub fn root_ptr(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.root.load(Ordering::Acquire).cast::<u8>())
    }

    pub(crate) fn root(&self) -> &AtomicPtr<Segtab<N>> {
        &self.root
    }
}

/// The directory manager: owns the node pool and the page source, and
/// knows how to decompose a virtual address for a directory shaped by the
/// const generics `N` (`SEGTABSIZE`), `NPTEPG`, and `THREE_LEVEL`.
///
/// `LEAF_CACHE_CAP` defaults to `64`; set it to `0` to disable the leaf
/// cache entirely (see [`PoolState`]).
pub struct Dir<M, S, const N: usize, const NPTEPG: usize, const THREE_LEVEL: bool, const LEAF_CACHE_CAP: usize = 64>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    source: S,
    pool: Pool<M, S, N, LEAF_CACHE_CAP>,
}

impl<M, S, const N: usize, const NPTEPG: usize, const THREE_LEVEL: bool, const LEAF_CACHE_CAP: usize>
    Dir<M, S, N, NPTEPG, THREE_LEVEL, LEAF_CACHE_CAP>
where
    M: Mutex<Data = PoolState<S, N, LEAF_CACHE_CAP>>,
    S: PageSource,
{
    pub fn new(source: S) -> Self {
        assert!(N.is_power_of_two(), "SEGTABSIZE must be a power of two");
        assert!(NPTEPG.is_power_of_two(), "NPTEPG must be a power of two");
        assert!(
            S::PAGE_SIZE.is_power_of_two(),
            "PageSource::PAGE_SIZE must be a power of two"
        );
        Self {
            source,
            pool: Pool::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Materializes `directory`'s root node.
    ///
    /// Must be called exactly once, before any other operation on
    /// `directory`, mirroring the reference implementation allocating the
    /// top-level segtab unconditionally when a pmap is created rather than
    /// lazily on first use.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `directory` already has a root.
    pub fn init_directory(&self, directory: &Directory<N>) {
        debug_assert!(
            directory.root_ptr().is_none(),
            "directory already initialized"
        );
        let stb = self.pool.get_segtab(&self.source);
        directory.root().store(stb.as_ptr(), Ordering::Release);
    }

    fn decompose(&self, va: VirtAddr) -> Indices {
        decompose(va, S::PAGE_SIZE, N, NPTEPG, THREE_LEVEL)
    }

    /// Byte stride between two consecutive PTE slots in a leaf page.
    fn pte_stride(&self) -> usize {
        S::PAGE_SIZE / NPTEPG
    }
}

fn load_slot<const N: usize>(stb: NonNull<Segtab<N>>, index: usize) -> *mut u8 {
    unsafe { stb.as_ref().slot(index).load(Ordering::Acquire) }
}
