//! The demo workload the simulator runs.
//!
//! Two tasks are sent a fixed batch of messages at startup, each saving one
//! message once before consuming everything. A simulated UART interrupt
//! pushes frames into a [`SlotRing`] from its own thread and wakes a third
//! task to drain them.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ember_kernel::{isr, Kernel, Message, MessageBox, Platform, RawHeap, Task, TaskRef, Verdict};
use hosted_config::{TaskDemoConfig, UartIrqConfig};
use miette::{miette, IntoDiagnostic, Result};
use slotring::{ByteRing, SlotRing};

use crate::platform::Irq;

/// Identifier of the message the UART interrupt sends after pushing a frame.
pub const UART_WAKE: u16 = 0x100;

pub const UART_FRAME: usize = 8;
pub const UART_FRAMES: usize = 16;

/// Frames received by the simulated UART, written from interrupt context.
pub static UART_RX: SlotRing<UART_FRAMES, UART_FRAME> = SlotRing::new();

/// The simulated UART: its drain task, and the thread raising its interrupt.
#[derive(Debug)]
pub struct Uart {
    pub task: TaskRef,
    pub irq_thread: JoinHandle<()>,
    received: Arc<AtomicU32>,
}

fn log_message(task: &str, msg: &Message) {
    tracing::debug!(
        task,
        id = %format_args!("{:#x}", msg.id()),
        len = msg.len(),
        payload = ?msg.payload(),
        "handling message"
    );
}

/// Saves the first message it is offered, then consumes everything.
pub fn user_task1() -> TaskRef {
    let mut saved = false;
    Task::new("user_task1", move |msg: &Message| {
        log_message("user_task1", msg);
        if saved {
            return Verdict::Consumed;
        }
        saved = true;
        tracing::debug!(task = "user_task1", "saved");
        Verdict::Saved
    })
}

/// Saves the first message with an id above `0x10`, then consumes
/// everything.
pub fn user_task2() -> TaskRef {
    let mut saved = false;
    Task::new("user_task2", move |msg: &Message| {
        log_message("user_task2", msg);
        if saved || msg.id() <= 0x10 {
            return Verdict::Consumed;
        }
        saved = true;
        tracing::debug!(task = "user_task2", "saved");
        Verdict::Saved
    })
}

/// Queues the startup batch for the two demo tasks.
pub fn send_task_demo<P: Platform>(
    kernel: &Kernel<P>,
    task1: &TaskRef,
    task2: &TaskRef,
    config: &TaskDemoConfig,
) -> Result<()> {
    let send = |task: &TaskRef, id: u16, payload: Option<&[u8]>| -> Result<()> {
        let len = payload.map_or(0, |p| p.len() as u16);
        let msg = kernel
            .alloc_message(id, len, payload)
            .ok_or_else(|| miette!("heap exhausted allocating message {id:#x}"))?;
        kernel.dispatcher().send(task, msg);
        Ok(())
    };

    let counting: [u8; 10] = std::array::from_fn(|i| i as u8);
    let offset: [u8; 10] = std::array::from_fn(|i| i as u8 + 0x10);
    send(task1, 1, None)?;
    send(task1, 2, None)?;
    send(task1, 0x10, Some(&counting[..]))?;
    send(task1, 0x11, Some(&offset[..]))?;

    let counting: [u8; 20] = std::array::from_fn(|i| i as u8);
    let offset: [u8; 20] = std::array::from_fn(|i| i as u8 + 0x10);
    send(task2, 8, None)?;
    send(task2, 9, None)?;
    send(task2, 0x50, Some(&counting[..]))?;
    send(task2, 0x51, Some(&offset[..]))?;

    let len = config.big_message_len;
    let mut big = MessageBox::zeroed(kernel.heap(), 0x51, len)
        .ok_or_else(|| miette!("heap exhausted allocating a {len} byte message"))?;
    for (i, b) in big.payload_mut().iter_mut().enumerate() {
        *b = (i as u8).wrapping_add(0x50);
    }
    kernel.dispatcher().send(task2, big);

    tracing::info!(free = kernel.heap().free(), "demo tasks queued");
    Ok(())
}

/// Exercises the ring buffers once, logging what happens.
pub fn ring_demo() -> Result<(), slotring::Error> {
    let mut ring = SlotRing::<4, 2>::new();
    for i in 0..4u8 {
        ring.put(&[i, i + 1])?;
    }
    let overflow = ring.put(&[0xff, 0xff]);
    tracing::info!(len = ring.len(), full = ring.is_full(), ?overflow, "filled slot ring");

    let mut item = [0u8; 2];
    ring.get(&mut item)?;
    tracing::info!(?item, len = ring.len(), free = ring.free(), "took one item");

    let mut slot = ring.reserve()?;
    slot.copy_from_slice(&[0xaa, 0xbb]);
    let candidate = slot.candidate_index();
    slot.commit();
    tracing::info!(candidate, len = ring.len(), "committed a reservation");

    while ring.get(&mut item).is_ok() {
        tracing::debug!(?item, "drained item");
    }

    let mut bytes = ByteRing::<32>::new();
    let text = b"a byte ring holds whatever fits, and no more";
    let written = bytes.put(text);
    let mut out = [0u8; 64];
    let read = bytes.get(&mut out);
    tracing::info!(
        offered = text.len(),
        written,
        read,
        text = %String::from_utf8_lossy(&out[..read]),
        "byte ring"
    );

    Ok(())
}

/// Splits [`UART_RX`] and starts raising the simulated UART interrupt.
///
/// Fails if the UART was already started.
pub fn spawn_uart(
    heap: &'static dyn RawHeap,
    irq: Arc<Irq>,
    config: UartIrqConfig,
) -> Result<Uart> {
    let (mut tx, mut rx) = UART_RX
        .try_split()
        .map_err(|e| miette!("UART ring unavailable: {e:?}"))?;

    let received = Arc::new(AtomicU32::new(0));
    let task = Task::new("uart", {
        let received = received.clone();
        move |_: &Message| {
            let mut frame = [0u8; UART_FRAME];
            while rx.get(&mut frame).is_ok() {
                let seq = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
                tracing::debug!(seq, tail = ?&frame[4..], "uart frame");
                received.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Consumed
        }
    });

    let wake = task.clone();
    let period = Duration::from_millis(config.period_ms.into());
    let irq_thread = thread::Builder::new()
        .name("uart-irq".into())
        .spawn(move || {
            for seq in 0..config.count {
                thread::sleep(period);
                let _isr = isr::enter();

                match tx.reserve() {
                    Ok(mut frame) => {
                        frame[..4].copy_from_slice(&seq.to_le_bytes());
                        frame[4..].copy_from_slice(b"uart");
                        frame.commit();
                    }
                    Err(error) => {
                        tracing::warn!(seq, ?error, "uart overrun, dropping frame");
                        continue;
                    }
                }

                match MessageBox::alloc(heap, UART_WAKE, 0, None) {
                    Some(msg) => wake.send(msg),
                    None => tracing::warn!(seq, "no memory for uart wakeup"),
                }
                irq.raise();
            }
            tracing::info!(frames = config.count, "uart line quiet");
        })
        .into_diagnostic()?;

    Ok(Uart {
        task,
        irq_thread,
        received,
    })
}

// === impl Uart ===

impl Uart {
    /// Frames drained by the UART task so far.
    pub fn received(&self) -> u32 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn is_quiet(&self) -> bool {
        self.irq_thread.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_kernel::{ember_alloc::LlHeap, KernelSettings, NoPlatform};
    use std::ptr::NonNull;

    fn kernel() -> Kernel {
        let heap: &'static LlHeap = Box::leak(Box::new(LlHeap::empty()));
        let size = KernelSettings::DEFAULT_HEAP_SIZE;
        let buf = Box::leak(vec![0u8; size].into_boxed_slice());
        unsafe { heap.init(NonNull::from(buf).cast::<u8>(), size) };
        Kernel::new(KernelSettings::default(), NoPlatform, heap)
    }

    #[test]
    fn demo_tasks_drain_in_two_ticks() {
        let kernel = kernel();
        let baseline = kernel.heap().free();
        let (task1, task2) = (user_task1(), user_task2());
        kernel.dispatcher().create(&task1);
        kernel.dispatcher().create(&task2);
        let config = TaskDemoConfig {
            big_message_len: 100,
        };
        send_task_demo(&kernel, &task1, &task2, &config).unwrap();
        assert_eq!(task1.mailbox_len(), 4);
        assert_eq!(task2.mailbox_len(), 5);

        let first = kernel.tick(&mut ());
        assert_eq!(first.dispatch.saved, 2);
        assert!(first.has_remaining);
        assert_eq!(task1.mailbox_len(), 4);
        assert_eq!(task2.mailbox_len(), 3);

        let second = kernel.tick(&mut ());
        assert!(!second.has_remaining);
        assert_eq!(kernel.heap().free(), baseline);
    }

    #[test]
    fn oversized_demo_batch_is_an_error() {
        let kernel = kernel();
        let (task1, task2) = (user_task1(), user_task2());
        let config = TaskDemoConfig {
            big_message_len: u16::MAX,
        };
        assert!(send_task_demo(&kernel, &task1, &task2, &config).is_err());
    }

    #[test]
    fn ring_demo_runs() {
        ring_demo().unwrap();
    }

    #[test]
    fn uart_frames_reach_the_task() {
        let kernel = kernel();
        let irq = Arc::new(Irq::default());
        let config = UartIrqConfig {
            period_ms: 1,
            count: 3,
        };
        let uart = spawn_uart(kernel.heap(), irq.clone(), config).unwrap();
        kernel.dispatcher().create(&uart.task);

        // the ring is split for as long as the UART runs
        let again = UartIrqConfig {
            period_ms: 1,
            count: 1,
        };
        assert!(spawn_uart(kernel.heap(), irq.clone(), again).is_err());

        while !uart.is_quiet() || kernel.needs_polling() {
            kernel.tick(&mut ());
            irq.wait(Duration::from_millis(5));
        }
        assert_eq!(uart.received(), 3);
        uart.irq_thread.join().unwrap();
        assert_eq!(kernel.heap().used(), 0);
    }
}
