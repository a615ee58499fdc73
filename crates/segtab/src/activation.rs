//! Per-CPU activation of a directory's root.

use core::{ptr::NonNull, sync::atomic::Ordering};

use crate::{dir::Directory, segtab::Segtab};

/// The slice of per-CPU state this crate touches when switching address
/// spaces: the currently published segtab root(s).
///
/// Only the owning CPU may call through this trait for itself, mirroring
/// the per-CPU `Cpu` state the rest of the kernel uses for the running
/// process.
pub trait CpuContext {
    /// Publishes (or clears, on `None`) the pointer to the address space's
    /// root directory node.
    fn set_user_segtab(&self, ptr: Option<NonNull<u8>>);

    /// Publishes (or clears) the pointer to the top-level (`xseg`)
    /// directory node. Only meaningful on a three-level directory; a
    /// two-level implementation can make this a no-op.
    fn set_user_seg0tab(&self, ptr: Option<NonNull<u8>>);
}

/// The machine-dependent half of activation: whatever the hardware needs
/// told about a newly activated (or deactivated) directory, such as
/// reloading a translation-root register or flushing a TLB.
pub trait Activation<const N: usize> {
    fn md_xtab_activate(&self, directory: &Directory<N>);
    fn md_xtab_deactivate(&self, directory: &Directory<N>);
}

/// Activates `directory` on the calling CPU: lets `md` react first, then
/// publishes the root to `cpu` — or, if `directory` belongs to the kernel
/// pmap, publishes the invalid sentinel instead, since the kernel's own
/// mappings are never reached through the user-segtab field. On a
/// three-level, non-kernel directory this additionally publishes the
/// root's slot 0 (the top sub-directory) as the seg0tab.
///
/// `is_running_thread` is the caller's answer to "is the thread this
/// `directory` belongs to the one currently running on this CPU?" —
/// `activate` may legitimately be called for a pmap/thread pair that is
/// not actually scheduled here (e.g. during process setup), and per-CPU
/// state must be left untouched in that case. The caller, not this crate,
/// knows what a thread identity is, so it is passed in pre-evaluated
/// rather than as an opaque thread handle.
///
/// `is_kernel_pmap` is likewise the caller's answer to "is `directory` the
/// kernel's own directory?", since this crate has no pmap-identity
/// concept of its own.
pub fn activate<const N: usize>(
    cpu: &impl CpuContext,
    md: &impl Activation<N>,
    directory: &Directory<N>,
    three_level: bool,
    is_running_thread: bool,
    is_kernel_pmap: bool,
) {
    if !is_running_thread {
        return;
    }

    md.md_xtab_activate(directory);

    if is_kernel_pmap {
        cpu.set_user_segtab(None);
        cpu.set_user_seg0tab(None);
        return;
    }

    let root = directory.root_ptr();
    cpu.set_user_segtab(root);
    if three_level {
        let seg0 = root.and_then(|r| {
            let stb = r.cast::<Segtab<N>>();
            NonNull::new(unsafe { stb.as_ref().slot(0).load(Ordering::Acquire) })
        });
        cpu.set_user_seg0tab(seg0);
    } else {
        cpu.set_user_seg0tab(None);
    }
}

/// Deactivates whatever directory is currently published on `cpu` (e.g.
/// when switching to the kernel's own address space).
pub fn deactivate<const N: usize>(
    cpu: &impl CpuContext,
    md: &impl Activation<N>,
    directory: &Directory<N>,
) {
    md.md_xtab_deactivate(directory);
    cpu.set_user_segtab(None);
    cpu.set_user_seg0tab(None);
}

#[cfg(test)]
mod tests {
    use core::{cell::Cell, sync::atomic::Ordering};

    use super::*;
    use crate::dir::Directory;

    #[derive(Default)]
    struct RecordingCpu {
        segtab: Cell<Option<NonNull<u8>>>,
        seg0tab: Cell<Option<NonNull<u8>>>,
    }

    impl CpuContext for RecordingCpu {
        fn set_user_segtab(&self, ptr: Option<NonNull<u8>>) {
            self.segtab.set(ptr);
        }

        fn set_user_seg0tab(&self, ptr: Option<NonNull<u8>>) {
            self.seg0tab.set(ptr);
        }
    }

    struct CountingMd {
        activations: Cell<usize>,
        deactivations: Cell<usize>,
    }

    impl<const N: usize> Activation<N> for CountingMd {
        fn md_xtab_activate(&self, _directory: &Directory<N>) {
            self.activations.set(self.activations.get() + 1);
        }

        fn md_xtab_deactivate(&self, _directory: &Directory<N>) {
            self.deactivations.set(self.deactivations.get() + 1);
        }
    }

    #[test]
    fn two_level_activation_publishes_segtab_only() {
        let cpu = RecordingCpu::default();
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };
        let mut backing: u8 = 0;
        let root = NonNull::from(&mut backing);
        let dir = Directory::<8>::new(crate::VirtAddr::new(0));
        dir.root().store(root.as_ptr().cast(), Ordering::Relaxed);

        activate(&cpu, &md, &dir, false, true, false);

        assert_eq!(cpu.segtab.get(), Some(root));
        assert_eq!(cpu.seg0tab.get(), None);
        assert_eq!(md.activations.get(), 1);
    }

    #[test]
    fn three_level_activation_publishes_both_segtab_and_seg0tab() {
        let cpu = RecordingCpu::default();
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };

        let child: Segtab<8> = Segtab::zeroed();
        let child_ptr = NonNull::from(&child);
        let root: Segtab<8> = Segtab::zeroed();
        root.slot(0).store(child_ptr.as_ptr().cast(), Ordering::Relaxed);
        let root_ptr = NonNull::from(&root);

        let dir = Directory::<8>::new(crate::VirtAddr::new(0));
        dir.root().store(root_ptr.as_ptr(), Ordering::Relaxed);

        activate(&cpu, &md, &dir, true, true, false);

        assert_eq!(cpu.segtab.get(), Some(root_ptr.cast::<u8>()));
        assert_eq!(cpu.seg0tab.get(), Some(child_ptr.cast::<u8>()));
        assert_eq!(md.activations.get(), 1);
    }

    #[test]
    fn activation_is_a_no_op_when_not_the_running_thread() {
        let cpu = RecordingCpu::default();
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };
        let mut backing: u8 = 0;
        let root = NonNull::from(&mut backing);
        let dir = Directory::<8>::new(crate::VirtAddr::new(0));
        dir.root().store(root.as_ptr().cast(), Ordering::Relaxed);

        activate(&cpu, &md, &dir, false, false, false);

        assert_eq!(cpu.segtab.get(), None);
        assert_eq!(cpu.seg0tab.get(), None);
        assert_eq!(md.activations.get(), 0);
    }

    #[test]
    fn kernel_pmap_activation_publishes_invalid_sentinel() {
        let cpu = RecordingCpu::default();
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };
        let mut backing: u8 = 0;
        let root = NonNull::from(&mut backing);
        let dir = Directory::<8>::new(crate::VirtAddr::new(0));
        dir.root().store(root.as_ptr().cast(), Ordering::Relaxed);

        activate(&cpu, &md, &dir, false, true, true);

        assert_eq!(cpu.segtab.get(), None);
        assert_eq!(cpu.seg0tab.get(), None);
        assert_eq!(md.activations.get(), 1);
    }

    #[test]
    fn three_level_kernel_pmap_activation_clears_seg0tab_too() {
        let cpu = RecordingCpu::default();
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };

        let child: Segtab<8> = Segtab::zeroed();
        let child_ptr = NonNull::from(&child);
        let root: Segtab<8> = Segtab::zeroed();
        root.slot(0).store(child_ptr.as_ptr().cast(), Ordering::Relaxed);
        let root_ptr = NonNull::from(&root);

        let dir = Directory::<8>::new(crate::VirtAddr::new(0));
        dir.root().store(root_ptr.as_ptr(), Ordering::Relaxed);

        activate(&cpu, &md, &dir, true, true, true);

        assert_eq!(cpu.segtab.get(), None);
        assert_eq!(cpu.seg0tab.get(), None);
        assert_eq!(md.activations.get(), 1);
    }

    #[test]
    fn deactivation_clears_both_fields() {
        let cpu = RecordingCpu::default();
        cpu.set_user_segtab(NonNull::new(1 as *mut u8));
        cpu.set_user_seg0tab(NonNull::new(1 as *mut u8));
        let md = CountingMd {
            activations: Cell::new(0),
            deactivations: Cell::new(0),
        };
        let dir = Directory::<8>::new(crate::VirtAddr::new(0));

        deactivate(&cpu, &md, &dir);

        assert_eq!(cpu.segtab.get(), None);
        assert_eq!(cpu.seg0tab.get(), None);
        assert_eq!(md.deactivations.get(), 1);
    }
}
