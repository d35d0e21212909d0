//! Heap-allocated messages.
//!
//! A [`Message`] is a small header (identifier, payload length, mailbox
//! links) followed directly by its payload bytes, in a single allocation
//! from a [`RawHeap`]. It is owned through a [`MessageBox`]: sending a
//! message moves the box into a task's mailbox, and the dispatcher drops it
//! once the task's handler reports it as consumed.

use core::{
    alloc::Layout,
    fmt,
    mem,
    ptr::{self, addr_of, addr_of_mut, NonNull},
    slice,
};

use ember_alloc::RawHeap;
use ember_list::{Linked, Links};

/// A message header, followed in memory by `len` payload bytes.
#[repr(C)]
pub struct Message {
    links: Links<Message>,
    heap: &'static dyn RawHeap,
    id: u16,
    len: u16,
    payload: [u8; 0],
}

/// The owning handle for a [`Message`].
///
/// Dropping a `MessageBox` returns the message's memory to the heap it was
/// allocated from.
pub struct MessageBox(NonNull<Message>);

// === impl Message ===

impl Message {
    /// The identifier chosen by the sender.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Payload length, in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u16 {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        // Safety: the allocation always extends `len` bytes past the header.
        unsafe { slice::from_raw_parts(addr_of!(self.payload).cast::<u8>(), self.len as usize) }
    }

    fn layout(len: u16) -> Layout {
        // A `u16` payload behind a small header can't overflow `isize`.
        let payload = match Layout::array::<u8>(len as usize) {
            Ok(layout) => layout,
            Err(_) => unreachable!("u16 payloads always have a valid layout"),
        };
        match Layout::new::<Message>().extend(payload) {
            Ok((layout, _)) => layout.pad_to_align(),
            Err(_) => unreachable!("u16 payloads always have a valid layout"),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &format_args!("{:#x}", self.id))
            .field("len", &self.len)
            .finish()
    }
}

unsafe impl Linked<Links<Message>> for Message {
    type Handle = MessageBox;

    fn into_ptr(handle: MessageBox) -> NonNull<Message> {
        let ptr = handle.0;
        mem::forget(handle);
        ptr
    }

    unsafe fn from_ptr(ptr: NonNull<Message>) -> MessageBox {
        MessageBox(ptr)
    }

    unsafe fn links(ptr: NonNull<Message>) -> NonNull<Links<Message>> {
        let links = addr_of_mut!((*ptr.as_ptr()).links);
        NonNull::new_unchecked(links)
    }
}

// === impl MessageBox ===

impl MessageBox {
    /// Allocates a message with identifier `id` and `len` payload bytes from
    /// `heap`.
    ///
    /// The whole message is zeroed, then `payload` (if any) is copied to the
    /// start of the payload area. Returns `None` if the heap can't fit the
    /// message.
    ///
    /// # Panics
    ///
    /// If `payload` is longer than `len`.
    pub fn alloc(
        heap: &'static dyn RawHeap,
        id: u16,
        len: u16,
        payload: Option<&[u8]>,
    ) -> Option<Self> {
        if let Some(payload) = payload {
            assert!(
                payload.len() <= len as usize,
                "payload of {} bytes does not fit a {len} byte message",
                payload.len(),
            );
        }

        let layout = Message::layout(len);
        let Some(ptr) = critical_section::with(|_| heap.allocate(layout)) else {
            tracing::warn!(id, len, size = layout.size(), "message allocation failed");
            return None;
        };

        let msg = ptr.cast::<Message>();
        unsafe {
            ptr.as_ptr().write_bytes(0, layout.size());
            msg.as_ptr().write(Message {
                links: Links::new(),
                heap,
                id,
                len,
                payload: [],
            });
            if let Some(payload) = payload {
                let dst = addr_of_mut!((*msg.as_ptr()).payload).cast::<u8>();
                ptr::copy_nonoverlapping(payload.as_ptr(), dst, payload.len());
            }
        }

        tracing::trace!(id, len, "allocated message");
        Some(Self(msg))
    }

    /// Allocates a message with a zeroed payload of `len` bytes, to be filled
    /// in through [`payload_mut`](Self::payload_mut).
    pub fn zeroed(heap: &'static dyn RawHeap, id: u16, len: u16) -> Option<Self> {
        Self::alloc(heap, id, len, None)
    }

    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // Safety: we own the message, and the allocation always extends
        // `len` bytes past the header.
        unsafe {
            let msg = self.0.as_ptr();
            let len = (*msg).len as usize;
            slice::from_raw_parts_mut(addr_of_mut!((*msg).payload).cast::<u8>(), len)
        }
    }
}

impl core::ops::Deref for MessageBox {
    type Target = Message;

    fn deref(&self) -> &Message {
        unsafe { self.0.as_ref() }
    }
}

impl Drop for MessageBox {
    fn drop(&mut self) {
        let (heap, layout) = {
            let msg = unsafe { self.0.as_ref() };
            debug_assert!(!msg.links.is_linked(), "dropping a message still in a mailbox");
            (msg.heap, Message::layout(msg.len))
        };
        critical_section::with(|_| unsafe { heap.deallocate(self.0.cast(), layout) });
    }
}

impl fmt::Debug for MessageBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// Safety: a `MessageBox` uniquely owns its message, and the heap reference
// is `Sync`.
unsafe impl Send for MessageBox {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_heap;

    #[test]
    fn alloc_copies_payload_and_zero_fills() {
        let heap = test_heap(1024);
        let msg = MessageBox::alloc(heap, 0x10, 10, Some(&[1u8, 2, 3][..])).unwrap();
        assert_eq!(msg.id(), 0x10);
        assert_eq!(msg.len(), 10);
        assert_eq!(msg.payload(), &[1, 2, 3, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn zeroed_then_filled() {
        let heap = test_heap(1024);
        let mut msg = MessageBox::zeroed(heap, 0x51, 100).unwrap();
        assert!(msg.payload().iter().all(|&b| b == 0));
        for (i, b) in msg.payload_mut().iter_mut().enumerate() {
            *b = i as u8 + 0x50;
        }
        assert_eq!(msg.payload()[0], 0x50);
        assert_eq!(msg.payload()[99], 0x50 + 99);
    }

    #[test]
    fn empty_payload() {
        let heap = test_heap(1024);
        let msg = MessageBox::alloc(heap, 1, 0, None).unwrap();
        assert!(msg.is_empty());
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn drop_returns_memory() {
        let heap = test_heap(1024);
        let baseline = heap.free();
        let msgs: Vec<_> = (0..4)
            .map(|i| MessageBox::alloc(heap, i, 20, None).unwrap())
            .collect();
        assert!(heap.free() < baseline);
        drop(msgs);
        assert_eq!(heap.free(), baseline);
    }

    #[test]
    fn exhausted_heap_returns_none() {
        let heap = test_heap(256);
        assert!(MessageBox::alloc(heap, 1, 1024, None).is_none());
        let msg = MessageBox::alloc(heap, 1, 16, None);
        assert!(msg.is_some());
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn oversized_payload_panics() {
        let heap = test_heap(1024);
        let _ = MessageBox::alloc(heap, 1, 2, Some(&[1u8, 2, 3][..]));
    }
}
