//! An intrusive doubly-linked list.
//!
//! The link fields of every entry are stored inside the entry itself (in a
//! [`Links`] field), so pushing, popping and removing entries never allocates.
//! Ownership of an entry moves into the list as a [`Linked::Handle`] when it
//! is pushed, and moves back out when the entry is popped or removed.
//!
//! Removal is O(1): an entry finds its neighbours through its own links, so
//! any member can be unlinked without scanning the list.
//!
//! The list is *not* synchronized. When a list is shared between interrupt
//! and thread context, every access must happen inside the same critical
//! section.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

use core::{
    cell::UnsafeCell,
    fmt,
    iter::FusedIterator,
    marker::{PhantomData, PhantomPinned},
    mem,
    ptr::NonNull,
};

/// Trait implemented by types which can be members of an intrusive list.
///
/// # Safety
///
/// Implementations must ensure that:
///
/// - an entry is not moved or deallocated while it is linked into a list;
/// - [`links`](Self::links) always returns a pointer to the same [`Links`]
///   field for a given entry;
/// - [`into_ptr`](Self::into_ptr) and [`from_ptr`](Self::from_ptr) are
///   inverses of each other.
pub unsafe trait Linked<L> {
    /// The owning handle for entries in a list, e.g. `Box<Self>`.
    type Handle;

    /// Convert an owned `Handle` into a raw pointer, without dropping it.
    fn into_ptr(handle: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer back into an owned `Handle`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been produced by [`into_ptr`](Self::into_ptr) and must
    /// not have been converted back already.
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the entry pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid instance of `Self`.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<L>;
}

/// Links to the previous and next entries in a [`List`].
pub struct Links<T: ?Sized> {
    inner: UnsafeCell<LinksInner<T>>,
}

struct LinksInner<T: ?Sized> {
    next: Link<T>,
    prev: Link<T>,
    linked: bool,
    /// Linked entries must not be `Unpin`.
    _unpin: PhantomPinned,
}

type Link<T> = Option<NonNull<T>>;

/// An intrusive doubly-linked list.
pub struct List<T: Linked<Links<T>>> {
    head: Link<T>,
    tail: Link<T>,
    len: usize,
}

/// Iterator over shared references to the entries of a [`List`].
pub struct Iter<'list, T: Linked<Links<T>>> {
    curr: Link<T>,
    curr_back: Link<T>,
    len: usize,
    _list: PhantomData<&'list List<T>>,
}

/// A cursor that may remove entries while walking a [`List`].
///
/// The successor of the current entry is captured *before* the current entry
/// is handed out, so [`remove_current`](Cursor::remove_current) never loses
/// the iteration position.
pub struct Cursor<'list, T: Linked<Links<T>>> {
    list: &'list mut List<T>,
    curr: Link<T>,
    next: Link<T>,
}

#[inline]
unsafe fn links<'a, T: Linked<Links<T>>>(ptr: NonNull<T>) -> &'a Links<T> {
    T::links(ptr).as_ref()
}

// === impl List ===

impl<T: Linked<Links<T>>> List<T> {
    /// Returns a new, empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns `true` if the list has no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.head.is_none(), self.len == 0);
        self.head.is_none()
    }

    /// Returns the number of entries in the list.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list holds more than one entry.
    #[inline]
    #[must_use]
    pub fn has_multiple_nodes(&self) -> bool {
        self.len > 1
    }

    /// Appends an entry at the tail of the list.
    ///
    /// # Panics
    ///
    /// If the entry is already linked into a list.
    pub fn push_back(&mut self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        unsafe {
            let node = links(ptr);
            assert!(!node.is_linked(), "entry is already linked into a list");
            node.link(self.tail, None);
            match self.tail {
                Some(tail) => {
                    links(tail).set_next(Some(ptr));
                }
                None => self.head = Some(ptr),
            }
        }
        self.tail = Some(ptr);
        self.len += 1;
    }

    /// Prepends an entry at the head of the list.
    ///
    /// # Panics
    ///
    /// If the entry is already linked into a list.
    pub fn push_front(&mut self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        unsafe {
            let node = links(ptr);
            assert!(!node.is_linked(), "entry is already linked into a list");
            node.link(None, self.head);
            match self.head {
                Some(head) => {
                    links(head).set_prev(Some(ptr));
                }
                None => self.tail = Some(ptr),
            }
        }
        self.head = Some(ptr);
        self.len += 1;
    }

    /// Inserts an entry directly before `successor`.
    ///
    /// # Safety
    ///
    /// `successor` must be an entry of *this* list.
    ///
    /// # Panics
    ///
    /// If the inserted entry is already linked into a list.
    pub unsafe fn insert_before(&mut self, successor: NonNull<T>, item: T::Handle) {
        let ptr = T::into_ptr(item);
        let succ = links(successor);
        debug_assert!(succ.is_linked(), "successor is not linked");
        let node = links(ptr);
        assert!(!node.is_linked(), "entry is already linked into a list");

        let prev = succ.prev();
        node.link(prev, Some(successor));
        succ.set_prev(Some(ptr));
        match prev {
            Some(prev) => {
                links(prev).set_next(Some(ptr));
            }
            None => self.head = Some(ptr),
        }
        self.len += 1;
    }

    /// Inserts an entry before the first entry for which `before` returns
    /// `true`, scanning from the head. If no entry matches, the new entry is
    /// appended at the tail.
    ///
    /// This is O(n), and is intended for lists that need a custom ordering.
    pub fn insert_at(&mut self, item: T::Handle, mut before: impl FnMut(&T) -> bool) {
        let mut curr = self.head;
        while let Some(node) = curr {
            if before(unsafe { node.as_ref() }) {
                unsafe { self.insert_before(node, item) };
                return;
            }
            curr = unsafe { links(node).next() };
        }
        self.push_back(item);
    }

    /// Unlinks `node` from the list and returns its owning handle.
    ///
    /// The node finds its neighbours through its own links, so this is O(1).
    /// Returns `None` if the node is not currently linked.
    ///
    /// # Safety
    ///
    /// If `node` is linked, it must be linked into *this* list.
    pub unsafe fn remove(&mut self, node: NonNull<T>) -> Option<T::Handle> {
        let l = links(node);
        if !l.is_linked() {
            return None;
        }

        let prev = l.prev();
        let next = l.next();
        match prev {
            Some(prev) => {
                links(prev).set_next(next);
            }
            None => {
                debug_assert_eq!(self.head, Some(node), "node is not the head");
                self.head = next;
            }
        }
        match next {
            Some(next) => {
                links(next).set_prev(prev);
            }
            None => {
                debug_assert_eq!(self.tail, Some(node), "node is not the tail");
                self.tail = prev;
            }
        }

        l.unlink();
        self.len -= 1;
        Some(T::from_ptr(node))
    }

    /// Removes and returns the head of the list.
    pub fn pop_front(&mut self) -> Option<T::Handle> {
        let head = self.head?;
        unsafe { self.remove(head) }
    }

    /// Removes and returns the tail of the list.
    pub fn pop_back(&mut self) -> Option<T::Handle> {
        let tail = self.tail?;
        unsafe { self.remove(tail) }
    }

    /// Returns a reference to the head of the list.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.head.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns a reference to the tail of the list.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.tail.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns a raw pointer to the head of the list.
    ///
    /// Useful when the list is only reachable inside short critical sections,
    /// and an entry has to be referred to between them.
    #[inline]
    #[must_use]
    pub fn front_raw(&self) -> Option<NonNull<T>> {
        self.head
    }

    /// Returns a raw pointer to the tail of the list.
    #[inline]
    #[must_use]
    pub fn back_raw(&self) -> Option<NonNull<T>> {
        self.tail
    }

    /// Returns `true` if `node` is the head of this list.
    #[must_use]
    pub fn is_head(&self, node: &T) -> bool {
        self.head == Some(NonNull::from(node))
    }

    /// Returns `true` if `node` is the tail of this list.
    #[must_use]
    pub fn is_tail(&self, node: &T) -> bool {
        self.tail == Some(NonNull::from(node))
    }

    /// Returns the entry following `node`, or `None` if `node` is the tail.
    ///
    /// # Safety
    ///
    /// `node` must be an entry of *this* list.
    #[must_use]
    pub unsafe fn peek_next(&self, node: &T) -> Option<&T> {
        self.peek_next_raw(NonNull::from(node))
            .map(|ptr| ptr.as_ref())
    }

    /// Returns the entry preceding `node`, or `None` if `node` is the head.
    ///
    /// # Safety
    ///
    /// `node` must be an entry of *this* list.
    #[must_use]
    pub unsafe fn peek_prev(&self, node: &T) -> Option<&T> {
        links(NonNull::from(node)).prev().map(|ptr| ptr.as_ref())
    }

    /// Raw form of [`peek_next`](Self::peek_next).
    ///
    /// # Safety
    ///
    /// `node` must be an entry of *this* list.
    #[inline]
    #[must_use]
    pub unsafe fn peek_next_raw(&self, node: NonNull<T>) -> Option<NonNull<T>> {
        links(node).next()
    }

    /// Returns an iterator over the entries, from head to tail.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            curr: self.head,
            curr_back: self.tail,
            len: self.len,
            _list: PhantomData,
        }
    }

    /// Returns a [`Cursor`] positioned at the head of the list.
    #[must_use]
    pub fn cursor_front_mut(&mut self) -> Cursor<'_, T> {
        let curr = self.head;
        let next = curr.and_then(|c| unsafe { links(c).next() });
        Cursor {
            list: self,
            curr,
            next,
        }
    }

    #[cfg(any(test, debug_assertions))]
    #[allow(dead_code)]
    fn assert_valid(&self) {
        let mut count = 0;
        let mut prev = None;
        let mut curr = self.head;
        while let Some(node) = curr {
            let l = unsafe { links(node) };
            assert!(l.is_linked(), "entry {count} is not marked as linked");
            assert_eq!(unsafe { l.prev() }, prev, "entry {count} has a bad prev link");
            prev = curr;
            curr = unsafe { l.next() };
            count += 1;
        }
        assert_eq!(self.tail, prev, "tail does not point at the last entry");
        assert_eq!(self.len, count, "len does not match the number of entries");
    }
}

impl<T: Linked<Links<T>>> Drop for List<T> {
    fn drop(&mut self) {
        while let Some(handle) = self.pop_front() {
            drop(handle);
        }
    }
}

impl<T: Linked<Links<T>>> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked<Links<T>>> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}

impl<'list, T: Linked<Links<T>>> IntoIterator for &'list List<T> {
    type Item = &'list T;
    type IntoIter = Iter<'list, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

unsafe impl<T: Linked<Links<T>>> Send for List<T> where T: Send {}
unsafe impl<T: Linked<Links<T>>> Sync for List<T> where T: Sync {}

// === impl Links ===

impl<T: ?Sized> Links<T> {
    /// Returns new, unlinked links.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                next: None,
                prev: None,
                linked: false,
                _unpin: PhantomPinned,
            }),
        }
    }

    /// Returns `true` if this entry is currently a member of a list.
    #[inline]
    #[must_use]
    pub fn is_linked(&self) -> bool {
        unsafe { (*self.inner.get()).linked }
    }

    #[inline]
    unsafe fn next(&self) -> Link<T> {
        (*self.inner.get()).next
    }

    #[inline]
    unsafe fn prev(&self) -> Link<T> {
        (*self.inner.get()).prev
    }

    #[inline]
    unsafe fn set_next(&self, next: Link<T>) -> Link<T> {
        mem::replace(&mut (*self.inner.get()).next, next)
    }

    #[inline]
    unsafe fn set_prev(&self, prev: Link<T>) -> Link<T> {
        mem::replace(&mut (*self.inner.get()).prev, prev)
    }

    #[inline]
    unsafe fn link(&self, prev: Link<T>, next: Link<T>) {
        let inner = &mut *self.inner.get();
        inner.prev = prev;
        inner.next = next;
        inner.linked = true;
    }

    #[inline]
    unsafe fn unlink(&self) {
        let inner = &mut *self.inner.get();
        inner.prev = None;
        inner.next = None;
        inner.linked = false;
    }
}

impl<T: ?Sized> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = unsafe { &*self.inner.get() };
        f.debug_struct("Links")
            .field("next", &inner.next)
            .field("prev", &inner.prev)
            .field("linked", &inner.linked)
            .finish()
    }
}

unsafe impl<T: Send> Send for Links<T> {}
unsafe impl<T: Sync> Sync for Links<T> {}

// === impl Iter ===

impl<'list, T: Linked<Links<T>>> Iterator for Iter<'list, T> {
    type Item = &'list T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }
        let curr = self.curr?;
        self.len -= 1;
        unsafe {
            self.curr = links(curr).next();
            Some(curr.as_ref())
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<T: Linked<Links<T>>> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }
        let curr = self.curr_back?;
        self.len -= 1;
        unsafe {
            self.curr_back = links(curr).prev();
            Some(curr.as_ref())
        }
    }
}

impl<T: Linked<Links<T>>> ExactSizeIterator for Iter<'_, T> {}
impl<T: Linked<Links<T>>> FusedIterator for Iter<'_, T> {}

// === impl Cursor ===

impl<T: Linked<Links<T>>> Cursor<'_, T> {
    /// Returns the entry the cursor is pointing at, or `None` once the cursor
    /// has walked past the tail.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.curr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Advances to the successor captured when the current entry was reached.
    pub fn move_next(&mut self) {
        self.curr = self.next;
        self.next = self.curr.and_then(|c| unsafe { links(c).next() });
    }

    /// Removes the current entry and advances to its captured successor.
    pub fn remove_current(&mut self) -> Option<T::Handle> {
        let curr = self.curr?;
        let handle = unsafe { self.list.remove(curr) };
        self.move_next();
        handle
    }

    /// Returns the number of entries remaining in the underlying list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if the underlying list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
