use std::ptr::NonNull;

use ember_alloc::LlHeap;

/// Returns a leaked heap of `size` bytes.
pub(crate) fn test_heap(size: usize) -> &'static LlHeap {
    let heap: &'static LlHeap = Box::leak(Box::new(LlHeap::empty()));
    let buf = Box::leak(vec![0u8; size].into_boxed_slice());
    unsafe { heap.init(NonNull::from(buf).cast::<u8>(), size) };
    heap
}

pub(crate) fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse_lossy("kernel=debug")
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}
