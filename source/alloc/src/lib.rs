//! # Ember Alloc
//!
//! The heap interface consumed by the Ember runtime.
//!
//! Everything that allocates at runtime (messages, mostly) goes through the
//! [`RawHeap`] trait, so a platform is free to back it with whatever
//! allocator it has. This crate provides:
//!
//! * [`LlHeap`], a [`linked_list_allocator`] heap guarded by a
//!   [`critical_section::Mutex`], so it may be used from interrupt handlers;
//! * [`EmberAlloc`], which adapts any [`RawHeap`] into a
//!   [`GlobalAlloc`](core::alloc::GlobalAlloc) for use as the
//!   `#[global_allocator]`;
//! * with the `use-std` feature, a [`RawHeap`] impl for
//!   [`std::alloc::System`].
#![cfg_attr(not(any(test, feature = "use-std")), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod heap;

pub use self::heap::{EmberAlloc, LlHeap, RawHeap};
