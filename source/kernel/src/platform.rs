//! Hooks into the platform the runtime is running on.
//!
//! Every hook has a default that does nothing, so a platform only implements
//! the ones it actually has hardware for.

/// Platform services used by the [`Kernel`](crate::Kernel).
pub trait Platform {
    /// Called once from [`Kernel::new`](crate::Kernel::new), before anything
    /// else runs.
    fn init(&mut self) {}

    /// A free-running millisecond clock. The default clock never advances.
    fn now_ms(&self) -> u32 {
        0
    }

    /// Blocks for `ms` milliseconds.
    fn delay_ms(&self, _ms: u32) {}

    /// Arms a wakeup source that fires after `ms` milliseconds. Platforms that
    /// sleep while idle use this to bound how long they sleep for.
    fn timer_start(&self, _ms: u32) {}

    /// Disarms the wakeup source armed by [`timer_start`](Self::timer_start).
    fn timer_stop(&self) {}
}

/// A platform with none of the hooks implemented.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatform;

impl Platform for NoPlatform {}

/// A software timer module, polled once per [`Kernel::tick`](crate::Kernel::tick).
pub trait TimerService {
    /// Expire and run any timers that are due at `now_ms`.
    fn service_tick(&mut self, now_ms: u32);
}

/// No software timers.
impl TimerService for () {
    fn service_tick(&mut self, _now_ms: u32) {}
}
