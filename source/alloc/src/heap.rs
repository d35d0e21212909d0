use core::{
    alloc::{GlobalAlloc, Layout},
    cell::RefCell,
    ptr::{null_mut, NonNull},
};

use critical_section::Mutex;
use linked_list_allocator::Heap;
use portable_atomic::{AtomicUsize, Ordering};

/// A byte-granular heap with `malloc`/`free` semantics.
///
/// Implementations must be safe to call from interrupt context.
pub trait RawHeap: Sync {
    /// Allocates a block matching `layout`, or returns `None` if the heap
    /// can't satisfy the request.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on this
    /// heap with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Total size of the heap, in bytes.
    fn size(&self) -> usize;

    /// Bytes currently handed out.
    fn used(&self) -> usize;

    /// Bytes still available.
    fn free(&self) -> usize {
        self.size() - self.used()
    }
}

/// A [`linked_list_allocator::Heap`] that may be shared with interrupt
/// handlers.
///
/// Every operation runs inside a critical section.
pub struct LlHeap {
    heap: Mutex<RefCell<Heap>>,
    failures: AtomicUsize,
}

/// Adapts a [`RawHeap`] into a [`GlobalAlloc`].
///
/// ```rust,ignore
/// #[global_allocator]
/// static AHEAP: EmberAlloc<LlHeap> = EmberAlloc::new(LlHeap::empty());
/// ```
pub struct EmberAlloc<H> {
    heap: H,
}

// === impl LlHeap ===

impl LlHeap {
    /// Returns a heap with no backing memory. Every allocation fails until
    /// [`init`](Self::init) is called.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            heap: Mutex::new(RefCell::new(Heap::empty())),
            failures: AtomicUsize::new(0),
        }
    }

    /// Hands `len` bytes starting at `start` to the heap.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, must not be used for
    /// anything else, and must live for as long as the heap.
    ///
    /// # Panics
    ///
    /// If the heap was already initialized.
    pub unsafe fn init(&self, start: NonNull<u8>, len: usize) {
        critical_section::with(|cs| {
            let mut heap = self.heap.borrow_ref_mut(cs);
            assert!(heap.size() == 0, "Already initialized the heap");
            heap.init(start.as_ptr(), len);
        })
    }

    /// Returns `true` once [`init`](Self::init) has been called.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.size() != 0
    }

    /// Returns `true` if nothing is currently allocated.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.used() == 0
    }

    /// Number of allocation requests that could not be satisfied.
    #[must_use]
    pub fn failed_allocations(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl RawHeap for LlHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let res = critical_section::with(|cs| {
            self.heap.borrow_ref_mut(cs).allocate_first_fit(layout).ok()
        });
        if res.is_none() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        critical_section::with(|cs| self.heap.borrow_ref_mut(cs).deallocate(ptr, layout))
    }

    fn size(&self) -> usize {
        critical_section::with(|cs| self.heap.borrow_ref(cs).size())
    }

    fn used(&self) -> usize {
        critical_section::with(|cs| self.heap.borrow_ref(cs).used())
    }

    fn free(&self) -> usize {
        critical_section::with(|cs| self.heap.borrow_ref(cs).free())
    }
}

impl core::fmt::Debug for LlHeap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        critical_section::with(|cs| {
            let heap = self.heap.borrow_ref(cs);
            f.debug_struct("LlHeap")
                .field("size", &heap.size())
                .field("used", &heap.used())
                .field("failures", &self.failed_allocations())
                .finish()
        })
    }
}

#[cfg(feature = "use-std")]
#[cfg_attr(docsrs, doc(cfg(feature = "use-std")))]
impl RawHeap for std::alloc::System {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { <std::alloc::System as GlobalAlloc>::alloc(self, layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        <std::alloc::System as GlobalAlloc>::dealloc(self, ptr.as_ptr(), layout)
    }

    /// The system allocator doesn't report a size.
    fn size(&self) -> usize {
        usize::MAX
    }

    /// The system allocator doesn't track usage.
    fn used(&self) -> usize {
        0
    }
}

// === impl EmberAlloc ===

impl<H> EmberAlloc<H> {
    pub const fn new(heap: H) -> Self {
        Self { heap }
    }

    /// Returns the wrapped heap, e.g. to hand it to the kernel.
    pub fn heap(&self) -> &H {
        &self.heap
    }
}

impl EmberAlloc<LlHeap> {
    /// # Safety
    ///
    /// See [`LlHeap::init`].
    pub unsafe fn init(&self, start: NonNull<u8>, len: usize) {
        self.heap.init(start, len)
    }
}

unsafe impl<H: RawHeap> GlobalAlloc for EmberAlloc<H> {
    #[inline(always)]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.heap
            .allocate(layout)
            .map_or(null_mut(), NonNull::as_ptr)
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        match NonNull::new(ptr) {
            Some(nn) => self.heap.deallocate(nn, layout),
            None => debug_assert!(false, "Deallocating a null?"),
        }
    }
}
