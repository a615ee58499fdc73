//! Ambient tracing hook.
//!
//! Mirrors the kernel's own `println!` idiom rather than pulling in the
//! `log` crate: a single function pointer, set once by the embedder, is
//! called with a formatted line at the handful of points the original
//! `UVMHIST_LOG` calls marked (pool miss/retry, CAS-loser discard, leaf
//! release on teardown). Disabled by default; compiled out entirely unless
//! the `trace` feature is enabled, so a production build pays nothing for
//! it.
use core::{
    fmt::{self, Write as _},
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

type TraceFn = fn(&str);

static TRACE_FN: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Registers the function called for each trace line.
///
/// Calling this more than once simply replaces the previous hook; there is
/// no un-registering.
pub fn set_hook(f: TraceFn) {
    let ptr: *mut () = unsafe { core::mem::transmute::<TraceFn, *mut ()>(f) };
    TRACE_FN.store(ptr, Ordering::Release);
}

struct FixedBuf {
    buf: [u8; 128],
    len: usize,
}

impl fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len() - self.len;
        let n = remaining.min(s.len());
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

#[doc(hidden)]
pub fn emit(args: fmt::Arguments<'_>) {
    let ptr = TRACE_FN.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let f: TraceFn = unsafe { core::mem::transmute::<*mut (), TraceFn>(ptr) };

    let mut buf = FixedBuf {
        buf: [0; 128],
        len: 0,
    };
    let _ = buf.write_fmt(args);
    let s = core::str::from_utf8(&buf.buf[..buf.len]).unwrap_or("<non-utf8 trace>");
    f(s);
}

/// Emits a trace line through the registered hook, if any.
///
/// Compiles to nothing unless the `trace` feature is enabled.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace")]
        $crate::trace::emit(format_args!($($arg)*));
    };
}

pub(crate) use trace;

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn hook(_line: &str) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn emit_without_hook_does_not_panic() {
        emit(format_args!("segtab: pool miss"));
    }

    #[test]
    fn emit_with_hook_invokes_it() {
        set_hook(hook);
        let before = CALLS.load(Ordering::Relaxed);
        emit(format_args!("segtab: refill {}", 42));
        assert_eq!(CALLS.load(Ordering::Relaxed), before + 1);
    }
}
