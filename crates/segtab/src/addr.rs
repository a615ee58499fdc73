//! Virtual address newtype and radix decomposition helpers.

use core::fmt;

/// A virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn wrapping_add(self, offset: usize) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Index of each radix level a virtual address decomposes into.
///
/// `xseg` is only meaningful on a three-level directory; it is `0` on a
/// two-level one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Indices {
    pub xseg: usize,
    pub seg: usize,
    pub pte: usize,
}

/// Returns `log2(n)`.
///
/// # Panics
///
/// Panics if `n` is not a power of two.
pub(crate) const fn shift_of(n: usize) -> u32 {
    assert!(n.is_power_of_two());
    n.trailing_zeros()
}

/// Decomposes `va` into directory indices for a directory shaped by
/// `SEGTABSIZE` (the fan-out of every intermediate level), `NPTEPG` (the
/// number of PTEs per leaf page), `PAGE_SIZE`, and whether the directory has
/// the extra top (`xseg`) level.
pub(crate) const fn decompose(
    va: VirtAddr,
    page_size: usize,
    segtabsize: usize,
    nptepg: usize,
    three_level: bool,
) -> Indices {
    let page_shift = shift_of(page_size);
    let pte_shift = shift_of(nptepg);
    let seg_shift = page_shift + pte_shift;

    let pte = (va.0 >> page_shift) & (nptepg - 1);
    let seg = (va.0 >> seg_shift) & (segtabsize - 1);
    let xseg = if three_level {
        let xseg_shift = seg_shift + shift_of(segtabsize);
        (va.0 >> xseg_shift) & (segtabsize - 1)
    } else {
        0
    };

    Indices { xseg, seg, pte }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_level_decomposition_round_trips_indices() {
        const PAGE_SIZE: usize = 4096;
        const SEGTABSIZE: usize = 512;
        const NPTEPG: usize = 512;

        let seg = 37;
        let pte = 511;
        let off = 0x123;
        let va = VirtAddr::new((seg * NPTEPG + pte) * PAGE_SIZE + off);

        let idx = decompose(va, PAGE_SIZE, SEGTABSIZE, NPTEPG, false);
        assert_eq!(idx.seg, seg);
        assert_eq!(idx.pte, pte);
        assert_eq!(idx.xseg, 0);
    }

    #[test]
    fn three_level_decomposition_extracts_xseg() {
        const PAGE_SIZE: usize = 4096;
        const SEGTABSIZE: usize = 512;
        const NPTEPG: usize = 512;

        let xseg = 3;
        let seg = 5;
        let pte = 7;
        let va = VirtAddr::new(((xseg * SEGTABSIZE + seg) * NPTEPG + pte) * PAGE_SIZE);

        let idx = decompose(va, PAGE_SIZE, SEGTABSIZE, NPTEPG, true);
        assert_eq!(idx.xseg, xseg);
        assert_eq!(idx.seg, seg);
        assert_eq!(idx.pte, pte);
    }
}
