//! # The Ember runtime
//!
//! Ember is a small cooperative runtime for resource-constrained
//! controllers, implemented as a library. Platform-specific code depends on
//! it and produces the final binary.
//!
//! ## Pieces
//!
//! * [`Task`]s are message handlers with a FIFO mailbox. Anything (including
//!   interrupt handlers) may [`send`](TaskRef::send) a task a [`MessageBox`].
//! * The [`Dispatcher`] keeps the registered tasks, and on each pass offers
//!   every task its queued messages. A handler answers with a [`Verdict`]:
//!   consumed messages are freed, and a saved message stays queued (blocking
//!   the rest of that mailbox) until the next pass.
//! * The [`Kernel`] bundles a dispatcher with the [`Platform`] hooks and the
//!   heap messages are allocated from.
//!
//! ## Creating the kernel
//!
//! The platform's entry point sets up its heap (any [`RawHeap`]; usually an
//! [`LlHeap`](ember_alloc::LlHeap) over a static region of RAM), then calls
//! [`Kernel::new()`].
//!
//! ## Running mode
//!
//! Once tasks are registered, the entry point calls [`Kernel::tick()`]
//! repeatedly. On each call to tick:
//!
//! * The software timer module is serviced
//! * The dispatcher makes one pass over every registered task
//!
//! The returned [`Tick`] says whether any messages are still queued. When
//! none are, [`Kernel::needs_polling`] is `false` and the platform may sleep
//! until an interrupt sends something.
//!
//! ## Interrupt safety
//!
//! All mailbox and registry mutation runs inside a [`critical_section`].
//! Platforms must provide a `critical-section` implementation that masks
//! interrupts; hosted builds use the crate's `std` implementation.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod isr;
pub mod message;
pub mod platform;
pub mod task;
#[cfg(test)]
mod test_util;

pub use ember_alloc::{self, RawHeap};
pub use self::{
    message::{Message, MessageBox},
    platform::{NoPlatform, Platform, TimerService},
    task::{Dispatch, Dispatcher, Handler, Task, TaskRef, Verdict},
};

use serde::{Deserialize, Serialize};

/// Runtime settings, usually loaded from the platform's config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct KernelSettings {
    /// Size of the heap handed to the kernel, in bytes. Defaults to 4KiB.
    pub heap_size: usize,
    /// Log a summary of every dispatch pass that did something. Defaults to
    /// `false`.
    pub log_dispatch: bool,
}

/// The result of one [`Kernel::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// What the dispatcher did.
    pub dispatch: Dispatch,
    /// `true` if any registered task still has queued messages.
    pub has_remaining: bool,
}

pub struct Kernel<P = NoPlatform> {
    settings: KernelSettings,
    platform: P,
    heap: &'static dyn RawHeap,
    dispatcher: Dispatcher,
}

// === impl KernelSettings ===

impl KernelSettings {
    pub const DEFAULT_HEAP_SIZE: usize = 0x1000;
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            heap_size: Self::DEFAULT_HEAP_SIZE,
            log_dispatch: false,
        }
    }
}

// === impl Kernel ===

impl<P: Platform> Kernel<P> {
    /// Creates the kernel, running the platform's [`init`](Platform::init)
    /// hook first.
    pub fn new(settings: KernelSettings, mut platform: P, heap: &'static dyn RawHeap) -> Self {
        platform.init();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            rustc = env!("VERGEN_RUSTC_SEMVER"),
            target = env!("VERGEN_CARGO_TARGET_TRIPLE"),
            "Ember kernel starting"
        );
        tracing::info!(
            size = heap.size(),
            free = heap.free(),
            configured = settings.heap_size,
            "Heap ready"
        );
        if heap.size() < settings.heap_size {
            tracing::warn!(
                size = heap.size(),
                configured = settings.heap_size,
                "heap is smaller than configured"
            );
        }

        Self {
            settings,
            platform,
            heap,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Services the software timers once, then makes one dispatch pass.
    pub fn tick(&self, timers: &mut impl TimerService) -> Tick {
        timers.service_tick(self.platform.now_ms());
        let dispatch = self.dispatcher.dispatch_once();
        let has_remaining = !self.dispatcher.all_mailboxes_empty();

        if self.settings.log_dispatch && dispatch != Dispatch::default() {
            tracing::debug!(
                tasks = dispatch.tasks,
                consumed = dispatch.consumed,
                saved = dispatch.saved,
                has_remaining,
                "tick"
            );
        }

        Tick {
            dispatch,
            has_remaining,
        }
    }

    /// Returns `true` if any registered task has queued messages.
    #[must_use]
    pub fn needs_polling(&self) -> bool {
        !self.dispatcher.all_mailboxes_empty()
    }

    /// If nothing is queued, sleeps for up to `ms` milliseconds using the
    /// platform's wakeup timer, and returns `true`.
    pub fn idle(&self, ms: u32) -> bool {
        if self.needs_polling() {
            return false;
        }
        self.platform.timer_start(ms);
        self.platform.delay_ms(ms);
        self.platform.timer_stop();
        true
    }

    /// Allocates a message from the kernel's heap. See [`MessageBox::alloc`].
    pub fn alloc_message(&self, id: u16, len: u16, payload: Option<&[u8]>) -> Option<MessageBox> {
        MessageBox::alloc(self.heap, id, len, payload)
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn heap(&self) -> &'static dyn RawHeap {
        self.heap
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }
}

impl<P: core::fmt::Debug> core::fmt::Debug for Kernel<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("settings", &self.settings)
            .field("platform", &self.platform)
            .field("heap_free", &self.heap.free())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(all(feature = "panic-handler", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    tracing::error!(%info, "panicked");
    loop {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_heap, trace_init};
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[derive(Debug, Default)]
    struct CountingPlatform {
        inits: u32,
        slept: AtomicU32,
        timers: AtomicU32,
    }

    impl Platform for CountingPlatform {
        fn init(&mut self) {
            self.inits += 1;
        }

        fn now_ms(&self) -> u32 {
            42
        }

        fn delay_ms(&self, ms: u32) {
            self.slept.fetch_add(ms, Ordering::Relaxed);
        }

        fn timer_start(&self, _ms: u32) {
            self.timers.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Timers(Vec<u32>);

    impl TimerService for Timers {
        fn service_tick(&mut self, now_ms: u32) {
            self.0.push(now_ms);
        }
    }

    #[test]
    fn new_runs_platform_init() {
        trace_init();
        let kernel = Kernel::new(
            KernelSettings::default(),
            CountingPlatform::default(),
            test_heap(KernelSettings::DEFAULT_HEAP_SIZE),
        );
        assert_eq!(kernel.platform().inits, 1);
        assert!(kernel.dispatcher().registry_empty());
        assert!(!kernel.needs_polling());
    }

    #[test]
    fn tick_services_timers_then_dispatches() {
        trace_init();
        let kernel = Kernel::new(
            KernelSettings {
                log_dispatch: true,
                ..KernelSettings::default()
            },
            CountingPlatform::default(),
            test_heap(KernelSettings::DEFAULT_HEAP_SIZE),
        );
        let seen = Arc::new(AtomicU32::new(0));
        let task = Task::new("count", {
            let seen = seen.clone();
            move |_: &Message| {
                seen.fetch_add(1, Ordering::Relaxed);
                Verdict::Consumed
            }
        });
        kernel.dispatcher().create(&task);
        task.send(kernel.alloc_message(1, 4, Some(&[1u8, 2, 3, 4][..])).unwrap());
        assert!(kernel.needs_polling());

        let mut timers = Timers(Vec::new());
        let tick = kernel.tick(&mut timers);
        assert_eq!(timers.0, [42]);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert!(!tick.has_remaining);
        assert_eq!(tick.dispatch.consumed, 1);
        assert!(!kernel.needs_polling());
    }

    #[test]
    fn idle_only_sleeps_without_work() {
        let kernel = Kernel::new(
            KernelSettings::default(),
            CountingPlatform::default(),
            test_heap(KernelSettings::DEFAULT_HEAP_SIZE),
        );
        assert!(kernel.idle(5));
        assert_eq!(kernel.platform().slept.load(Ordering::Relaxed), 5);
        assert_eq!(kernel.platform().timers.load(Ordering::Relaxed), 1);

        let task = Task::new("saver", |_: &Message| Verdict::Saved);
        kernel.dispatcher().create(&task);
        task.send(kernel.alloc_message(1, 0, None).unwrap());
        assert!(!kernel.idle(5));
        assert_eq!(kernel.platform().slept.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn settings_defaults() {
        let settings = KernelSettings::default();
        assert_eq!(settings.heap_size, 0x1000);
        assert!(!settings.log_dispatch);
    }
}
