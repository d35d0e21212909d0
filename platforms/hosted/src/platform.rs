//! The desktop stand-ins for the hardware a real port would drive.

use std::{
    cell::Cell,
    fmt, mem,
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use ember_kernel::{Platform, RawHeap, TimerService};

/// A simulated interrupt line.
///
/// Threads that simulate hardware raise it after sending a message, and the
/// platform's idle delay returns early when it fires, the way a core in
/// wait-for-interrupt would.
#[derive(Debug, Default)]
pub struct Irq {
    pending: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug)]
pub struct HostedPlatform {
    start: Instant,
    irq: Arc<Irq>,
    deadline: Cell<Option<Instant>>,
}

/// A software timer that logs heap usage every `period_ms`.
pub struct Heartbeat {
    heap: &'static dyn RawHeap,
    period_ms: u32,
    next_ms: u32,
    beats: u32,
}

// === impl Irq ===

impl Irq {
    pub fn raise(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.wake.notify_one();
    }

    /// Waits until the line is raised or `timeout` elapses. Returns `true` if
    /// woken by the interrupt, and clears it.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .wake
            .wait_timeout_while(pending, timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        mem::take(&mut *pending)
    }
}

// === impl HostedPlatform ===

impl HostedPlatform {
    pub fn new(irq: Arc<Irq>) -> Self {
        Self {
            start: Instant::now(),
            irq,
            deadline: Cell::new(None),
        }
    }

    pub fn irq(&self) -> &Arc<Irq> {
        &self.irq
    }
}

impl Platform for HostedPlatform {
    fn init(&mut self) {
        self.start = Instant::now();
        tracing::info!("hosted platform up");
    }

    fn now_ms(&self) -> u32 {
        // wraps after ~49 days, like a hardware tick counter
        self.start.elapsed().as_millis() as u32
    }

    /// Sleeps for `ms`, or until the armed timer or a simulated interrupt
    /// fires, whichever comes first.
    fn delay_ms(&self, ms: u32) {
        let mut timeout = Duration::from_millis(ms.into());
        if let Some(deadline) = self.deadline.get() {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }

        tracing::trace!(?timeout, "waiting for an interrupt...");
        if self.irq.wait(timeout) {
            tracing::trace!("...woken by interrupt");
        } else {
            tracing::trace!("...woken by timer");
        }
    }

    fn timer_start(&self, ms: u32) {
        let deadline = Instant::now() + Duration::from_millis(ms.into());
        self.deadline.set(Some(deadline));
    }

    fn timer_stop(&self) {
        self.deadline.set(None);
    }
}

// === impl Heartbeat ===

impl Heartbeat {
    pub fn new(heap: &'static dyn RawHeap, period_ms: u32) -> Self {
        Self {
            heap,
            period_ms,
            next_ms: period_ms,
            beats: 0,
        }
    }

    #[must_use]
    pub fn beats(&self) -> u32 {
        self.beats
    }
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("period_ms", &self.period_ms)
            .field("next_ms", &self.next_ms)
            .field("beats", &self.beats)
            .finish_non_exhaustive()
    }
}

impl TimerService for Heartbeat {
    fn service_tick(&mut self, now_ms: u32) {
        // wrapping compare, so the timer survives the clock wrapping
        if (now_ms.wrapping_sub(self.next_ms) as i32) < 0 {
            return;
        }
        self.beats += 1;
        self.next_ms = now_ms.wrapping_add(self.period_ms);
        tracing::debug!(
            beat = self.beats,
            heap_used = self.heap.used(),
            heap_free = self.heap.free(),
            "heartbeat"
        );
    }
}
