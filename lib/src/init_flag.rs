//! One-shot initialization flags.

use core::sync::atomic::{AtomicBool, Ordering};

/// A set-once boolean for guarding single-init paths.
///
/// `claim()` is the compare-and-swap form for "first caller wins" init;
/// `mark_set()` is the unconditional form for init paths already serialized
/// some other way.
pub struct InitFlag {
    set: AtomicBool,
}

impl InitFlag {
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Atomically claim the flag. `true` exactly once per reset.
    #[inline]
    pub fn claim(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn mark_set(&self) {
        self.set.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Relaxed probe for hot paths that tolerate a stale answer.
    #[inline]
    pub fn is_set_relaxed(&self) -> bool {
        self.set.load(Ordering::Relaxed)
    }

    /// Clear the flag (teardown and suite reset paths).
    #[inline]
    pub fn reset(&self) {
        self.set.store(false, Ordering::Release);
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}
