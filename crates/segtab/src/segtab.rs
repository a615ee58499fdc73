//! The directory node type shared by every level of the hierarchy.

use core::{
    ptr,
    ptr::NonNull,
    sync::atomic::{AtomicPtr, Ordering},
};

/// One directory node: `N` slots, each either null (empty), a pointer to a
/// child [`Segtab<N>`] (intermediate levels), or a pointer to a leaf page
/// (bottom level).
///
/// While parked on the free list, slot `0` is reused as the intrusive link
/// to the next free node and every other slot is null; this is the same
/// "slot zero doubles as the free-list link" trick the reference
/// implementation uses instead of a dedicated link field, so a node never
/// needs more memory on the free list than it does in service.
#[repr(C)]
pub struct Segtab<const N: usize>([AtomicPtr<u8>; N]);

impl<const N: usize> Segtab<N> {
    /// An all-null node, suitable for a fresh page carved up by the pool or
    /// for tests.
    pub(crate) const fn zeroed() -> Self {
        Self([const { AtomicPtr::new(ptr::null_mut()) }; N])
    }

    pub(crate) fn slot(&self, index: usize) -> &AtomicPtr<u8> {
        &self.0[index]
    }

    /// Reads the free-list link out of slot 0.
    ///
    /// # Safety
    ///
    /// `self` must currently be on a free list (every slot but 0 null).
    pub(crate) unsafe fn free_link(&self) -> Option<NonNull<Segtab<N>>> {
        NonNull::new(self.0[0].load(Ordering::Relaxed)).map(NonNull::cast)
    }

    /// Writes the free-list link into slot 0.
    ///
    /// # Safety
    ///
    /// `self` must currently be on, or about to be placed on, a free list.
    pub(crate) unsafe fn set_free_link(&self, next: Option<NonNull<Segtab<N>>>) {
        let raw = next.map_or(ptr::null_mut(), |p| p.as_ptr().cast::<u8>());
        self.0[0].store(raw, Ordering::Relaxed);
    }

    /// `true` iff every slot is null, the required state for a node about
    /// to be returned to the pool.
    pub(crate) fn is_all_null(&self) -> bool {
        self.0.iter().all(|slot| slot.load(Ordering::Relaxed).is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_segtab_has_null_slots() {
        let stb: Segtab<8> = Segtab::zeroed();
        assert!(stb.is_all_null());
    }

    #[test]
    fn free_link_round_trips_through_slot_zero() {
        let a: Segtab<8> = Segtab::zeroed();
        let b: Segtab<8> = Segtab::zeroed();
        let b_ptr = NonNull::from(&b);

        unsafe {
            a.set_free_link(Some(b_ptr));
            assert_eq!(a.free_link(), Some(b_ptr));
            a.set_free_link(None);
            assert_eq!(a.free_link(), None);
        }
        assert!(a.is_all_null());
    }
}
