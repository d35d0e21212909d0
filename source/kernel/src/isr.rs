//! Interrupt context tracking.
//!
//! Interrupt handlers that send messages call [`enter`] first and hold the
//! returned guard for the rest of the handler. The runtime only uses this to
//! tag interrupt-context sends in its logs; correctness never depends on it,
//! since every mailbox mutation already runs in a critical section.

use portable_atomic::{AtomicU8, Ordering};

static DEPTH: AtomicU8 = AtomicU8::new(0);

/// Marks the current code as running inside an interrupt handler until
/// dropped. Guards nest.
#[must_use = "the interrupt context ends when the guard is dropped"]
pub struct IsrGuard {
    _p: (),
}

/// Enters interrupt context.
#[inline]
pub fn enter() -> IsrGuard {
    DEPTH.fetch_add(1, Ordering::AcqRel);
    IsrGuard { _p: () }
}

/// Returns `true` while any [`IsrGuard`] is alive.
#[inline]
#[must_use]
pub fn is_active() -> bool {
    depth() > 0
}

/// Current interrupt nesting depth.
#[inline]
#[must_use]
pub fn depth() -> u8 {
    DEPTH.load(Ordering::Acquire)
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        DEPTH.fetch_sub(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for IsrGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IsrGuard").field("depth", &depth()).finish()
    }
}
