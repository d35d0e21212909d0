use std::{alloc::System, ptr::NonNull, sync::Arc};

use clap::Parser;
use ember_alloc::{EmberAlloc, LlHeap};
use ember_config::EmberConfig;
use ember_kernel::{Kernel, RawHeap};
use hosted::{
    cli,
    demos,
    platform::{Heartbeat, HostedPlatform, Irq},
};
use hosted_config::PlatformConfig;
use miette::miette;

#[global_allocator]
static AHEAP: EmberAlloc<System> = EmberAlloc::new(System);

/// The heap messages are allocated from, sized by the config.
static HEAP: LlHeap = LlHeap::empty();

const HEARTBEAT_MS: u32 = 1_000;

fn main() -> miette::Result<()> {
    let args = cli::Args::parse();
    args.tracing.setup_tracing();
    let _span = tracing::info_span!("Hosted").entered();
    run(args.hosted)
}

#[tracing::instrument(name = "Kernel", level = "info", skip(opts))]
fn run(opts: cli::HostedOptions) -> miette::Result<()> {
    let config = ember_config::include_config!(PlatformConfig).map_err(|e| miette!("{e}"))?;
    tracing::info!(settings = ?config, "Loaded settings");

    let EmberConfig {
        kernel: settings,
        platform,
    } = config;
    let idle_ms = platform.idle_ms();
    let exit_when_idle = opts.exit_when_idle || platform.exit_when_idle;

    let heap_size = settings.heap_size;
    if heap_size == 0 {
        return Err(miette!("kernel.heap_size must not be zero"));
    }
    let region = Box::leak(vec![0u8; heap_size].into_boxed_slice());
    // Safety: this is the only place `HEAP` is initialized, and the region is
    // leaked so it lives forever.
    unsafe { HEAP.init(NonNull::from(region).cast::<u8>(), heap_size) };

    let irq = Arc::new(Irq::default());
    let kernel = Kernel::new(settings, HostedPlatform::new(irq.clone()), &HEAP);

    demos::ring_demo().map_err(|e| miette!("ring demo failed: {e:?}"))?;

    if platform.tasks.enabled {
        let task1 = demos::user_task1();
        let task2 = demos::user_task2();
        kernel.dispatcher().create(&task1);
        kernel.dispatcher().create(&task2);
        demos::send_task_demo(&kernel, &task1, &task2, &platform.tasks.into_settings())?;
    } else {
        tracing::warn!("Not registering demo tasks!");
    }

    let uart = if platform.uart_irq.enabled {
        let uart = demos::spawn_uart(kernel.heap(), irq, platform.uart_irq.into_settings())?;
        kernel.dispatcher().create(&uart.task);
        Some(uart)
    } else {
        tracing::warn!("Not spawning simulated UART interrupt!");
        None
    };

    let mut heartbeat = Heartbeat::new(kernel.heap(), HEARTBEAT_MS);
    let mut reported = false;
    let mut ticks = 0u64;
    loop {
        let tick = kernel.tick(&mut heartbeat);
        ticks += 1;
        if opts.max_ticks.is_some_and(|max| ticks >= max) {
            tracing::info!(ticks, "tick limit reached");
            break;
        }
        if tick.has_remaining {
            continue;
        }

        if !reported {
            reported = true;
            tracing::info!(ticks, free = HEAP.free(), "all mailboxes drained");
            if HEAP.used() != 0 && uart.as_ref().map_or(true, |uart| uart.is_quiet()) {
                tracing::error!(used = HEAP.used(), "heap still in use with nothing queued");
            }
        }

        let quiet = uart.as_ref().map_or(true, |uart| uart.is_quiet());
        if exit_when_idle && quiet {
            break;
        }
        kernel.idle(idle_ms);
    }

    if let Some(uart) = uart {
        let received = uart.received();
        uart.irq_thread
            .join()
            .map_err(|_| miette!("the UART interrupt thread panicked"))?;
        tracing::info!(received, "UART stopped");
    }

    tracing::info!(ticks, heap = ?HEAP, "Kernel ended");
    Ok(())
}
