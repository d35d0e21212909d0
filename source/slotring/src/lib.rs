//! # Slotring
//!
//! A bounded FIFO of `CAP` fixed-size slots of `ITEM` bytes each.
//!
//! The read and write positions are kept as *doubled* indices in the range
//! `[0, 2 * CAP)`, and the physical slot is `index % CAP`. Keeping one extra
//! "lap" bit in the index is what lets a completely full ring be told apart
//! from an empty one without sacrificing a slot:
//!
//! ```text
//! used = if write >= read { write - read } else { 2 * CAP - (read - write) }
//! ```
//!
//! Besides the one-shot [`put`](SlotRing::put), items may be enqueued in two
//! phases: [`reserve`](SlotRing::reserve) hands out the next free slot so the
//! item can be built in place, and [`Reservation::commit`] publishes it.
//! Until the commit, the ring looks unchanged to readers.
//!
//! A ring can be driven directly through `&mut SlotRing`, or split with
//! [`SlotRing::try_split`] into a [`Producer`] and a [`Consumer`] which may
//! live in different execution contexts (e.g. an interrupt handler and the
//! main loop). Only one producer and one consumer exist at a time.
//!
//! Every slot is stored word aligned, and the slot stride is rounded up to a
//! multiple of four bytes, so an item built in place through a reservation
//! always starts on a word boundary.
#![cfg_attr(not(test), no_std)]

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    ptr,
};
use portable_atomic::{
    AtomicU16, AtomicU8,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

pub mod bytes;
pub use self::bytes::ByteRing;

/// The largest number of slots a [`SlotRing`] may have.
///
/// Doubled indices must fit in a `u16`.
pub const MAX_CAPACITY: usize = (u16::MAX / 2) as usize;

/// Result type used by the ring interfaces
pub type Result<T> = core::result::Result<T, Error>;

/// Error type used by the ring interfaces
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Error {
    /// Every slot is in use
    Full,

    /// No slot is in use
    Empty,

    /// The item does not fit in a slot, or the output buffer is shorter than
    /// a slot
    ItemSize,

    /// Unable to split the ring, as a producer/consumer pair already exists
    AlreadySplit,
}

/// A ring of `CAP` slots of `ITEM` bytes each.
pub struct SlotRing<const CAP: usize, const ITEM: usize> {
    slots: UnsafeCell<[Slot<ITEM>; CAP]>,

    /// Where the next item will be read from. Owned by the reader.
    read: AtomicU16,

    /// Where the next item will be written to. Owned by the writer.
    write: AtomicU16,

    /// Which split handles are currently live.
    split: AtomicU8,
}

#[derive(Clone, Copy)]
#[repr(C, align(4))]
struct Slot<const ITEM: usize>([u8; ITEM]);

/// The writing half of a split [`SlotRing`].
pub struct Producer<'a, const CAP: usize, const ITEM: usize> {
    ring: &'a SlotRing<CAP, ITEM>,
}

/// The reading half of a split [`SlotRing`].
pub struct Consumer<'a, const CAP: usize, const ITEM: usize> {
    ring: &'a SlotRing<CAP, ITEM>,
}

/// A slot handed out by [`SlotRing::reserve`] or [`Producer::reserve`].
///
/// The reservation dereferences to the slot's bytes, which still hold
/// whatever item previously occupied the slot. Calling
/// [`commit`](Self::commit) publishes the slot; dropping the reservation
/// without committing leaves the ring untouched.
#[must_use = "a reservation has no effect unless it is committed"]
pub struct Reservation<'a, const CAP: usize, const ITEM: usize> {
    ring: &'a SlotRing<CAP, ITEM>,
    slot: &'a mut [u8; ITEM],
    candidate: u16,
}

const PRODUCER: u8 = 1 << 0;
const CONSUMER: u8 = 1 << 1;

unsafe impl<const CAP: usize, const ITEM: usize> Sync for SlotRing<CAP, ITEM> {}

// === impl SlotRing ===

impl<const CAP: usize, const ITEM: usize> SlotRing<CAP, ITEM> {
    const CAPACITY_OK: () = assert!(
        CAP > 0 && CAP <= MAX_CAPACITY,
        "slot ring capacity must be in 1..=MAX_CAPACITY"
    );

    const WRAP: u16 = (CAP * 2) as u16;

    /// Returns a new, empty ring with zeroed storage.
    ///
    /// Rings with `CAP == 0` or `CAP > MAX_CAPACITY` fail to compile.
    #[must_use]
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Self {
            slots: UnsafeCell::new([Slot([0; ITEM]); CAP]),
            read: AtomicU16::new(0),
            write: AtomicU16::new(0),
            split: AtomicU8::new(0),
        }
    }

    /// Splits the ring into a [`Producer`] and a [`Consumer`].
    ///
    /// Returns [`Error::AlreadySplit`] while either handle of a previous
    /// split is still alive.
    pub fn try_split(&self) -> Result<(Producer<'_, CAP, ITEM>, Consumer<'_, CAP, ITEM>)> {
        self.split
            .compare_exchange(0, PRODUCER | CONSUMER, AcqRel, Acquire)
            .map_err(|_| Error::AlreadySplit)?;
        Ok((Producer { ring: self }, Consumer { ring: self }))
    }

    /// Copies `item` into the next free slot.
    ///
    /// Items shorter than `ITEM` are zero padded.
    pub fn put(&mut self, item: &[u8]) -> Result<()> {
        self.put_inner(item)
    }

    /// Copies the oldest item into `out[..ITEM]` and frees its slot.
    pub fn get(&mut self, out: &mut [u8]) -> Result<()> {
        self.get_inner(Some(out))
    }

    /// Frees the oldest slot without reading it.
    pub fn dequeue(&mut self) -> Result<()> {
        self.get_inner(None)
    }

    /// Returns the oldest item without removing it.
    #[must_use]
    pub fn peek(&mut self) -> Option<&[u8]> {
        self.peek_inner()
    }

    /// Hands out the next free slot for in-place construction.
    ///
    /// The ring is unchanged until [`Reservation::commit`] is called.
    pub fn reserve(&mut self) -> Result<Reservation<'_, CAP, ITEM>> {
        self.reserve_inner()
    }

    /// Empties the ring. Slot contents are left as they are.
    pub fn reset(&mut self) {
        self.read.store(0, Release);
        self.write.store(0, Release);
    }

    /// Returns the number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Returns the size of one item, in bytes.
    #[inline]
    #[must_use]
    pub const fn item_size(&self) -> usize {
        ITEM
    }

    /// Returns the number of slots holding an item.
    #[must_use]
    pub fn len(&self) -> usize {
        Self::used(self.read.load(Acquire), self.write.load(Acquire)) as usize
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn free(&self) -> usize {
        CAP - self.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == CAP
    }

    #[inline]
    fn used(read: u16, write: u16) -> u16 {
        if write >= read {
            write - read
        } else {
            Self::WRAP - (read - write)
        }
    }

    #[inline]
    fn advance(idx: u16) -> u16 {
        let next = idx + 1;
        if next == Self::WRAP {
            0
        } else {
            next
        }
    }

    /// # Safety
    ///
    /// The caller must have exclusive access to the slot at `idx`: either it
    /// is the writer and the slot is free, or it is the reader and the slot
    /// is in use.
    #[inline]
    unsafe fn slot(&self, idx: u16) -> *mut [u8; ITEM] {
        let base = self.slots.get().cast::<Slot<ITEM>>();
        base.add(idx as usize % CAP).cast::<[u8; ITEM]>()
    }

    // Writer half. Must never store to `read`.

    fn reserve_inner(&self) -> Result<Reservation<'_, CAP, ITEM>> {
        let write = self.write.load(Relaxed);
        let read = self.read.load(Acquire);
        if Self::used(read, write) as usize == CAP {
            return Err(Error::Full);
        }

        // Safety: the slot at `write` is free, and only the writer touches
        // free slots.
        let slot = unsafe { &mut *self.slot(write) };
        Ok(Reservation {
            ring: self,
            slot,
            candidate: Self::advance(write),
        })
    }

    fn put_inner(&self, item: &[u8]) -> Result<()> {
        if item.len() > ITEM {
            return Err(Error::ItemSize);
        }
        let mut rsv = self.reserve_inner()?;
        let (head, tail) = rsv.split_at_mut(item.len());
        head.copy_from_slice(item);
        tail.fill(0);
        rsv.commit();
        Ok(())
    }

    // Reader half. Must never store to `write`.

    fn peek_inner(&self) -> Option<&[u8]> {
        let read = self.read.load(Relaxed);
        let write = self.write.load(Acquire);
        if Self::used(read, write) == 0 {
            return None;
        }
        // Safety: the slot at `read` is in use, so the writer won't touch it
        // until the reader releases it.
        Some(unsafe { &*self.slot(read) })
    }

    fn get_inner(&self, out: Option<&mut [u8]>) -> Result<()> {
        if matches!(out, Some(ref out) if out.len() < ITEM) {
            return Err(Error::ItemSize);
        }
        let read = self.read.load(Relaxed);
        let write = self.write.load(Acquire);
        if Self::used(read, write) == 0 {
            return Err(Error::Empty);
        }
        if let Some(out) = out {
            // Safety: the slot at `read` is in use, see `peek_inner`.
            unsafe {
                ptr::copy_nonoverlapping(self.slot(read).cast::<u8>(), out.as_mut_ptr(), ITEM);
            }
        }
        self.read.store(Self::advance(read), Release);
        Ok(())
    }
}

impl<const CAP: usize, const ITEM: usize> Default for SlotRing<CAP, ITEM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize, const ITEM: usize> core::fmt::Debug for SlotRing<CAP, ITEM> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotRing")
            .field("capacity", &CAP)
            .field("item_size", &ITEM)
            .field("read", &self.read.load(Relaxed))
            .field("write", &self.write.load(Relaxed))
            .finish()
    }
}

// === impl Producer ===

impl<'a, const CAP: usize, const ITEM: usize> Producer<'a, CAP, ITEM> {
    /// Copies `item` into the next free slot. See [`SlotRing::put`].
    pub fn put(&mut self, item: &[u8]) -> Result<()> {
        self.ring.put_inner(item)
    }

    /// Hands out the next free slot. See [`SlotRing::reserve`].
    pub fn reserve(&mut self) -> Result<Reservation<'_, CAP, ITEM>> {
        self.ring.reserve_inner()
    }

    #[must_use]
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

impl<const CAP: usize, const ITEM: usize> Drop for Producer<'_, CAP, ITEM> {
    fn drop(&mut self) {
        self.ring.split.fetch_and(!PRODUCER, AcqRel);
    }
}

unsafe impl<const CAP: usize, const ITEM: usize> Send for Producer<'_, CAP, ITEM> {}

// === impl Consumer ===

impl<'a, const CAP: usize, const ITEM: usize> Consumer<'a, CAP, ITEM> {
    /// Copies the oldest item into `out` and frees its slot. See
    /// [`SlotRing::get`].
    pub fn get(&mut self, out: &mut [u8]) -> Result<()> {
        self.ring.get_inner(Some(out))
    }

    /// Frees the oldest slot without reading it.
    pub fn dequeue(&mut self) -> Result<()> {
        self.ring.get_inner(None)
    }

    /// Returns the oldest item without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&[u8]> {
        self.ring.peek_inner()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAP: usize, const ITEM: usize> Drop for Consumer<'_, CAP, ITEM> {
    fn drop(&mut self) {
        self.ring.split.fetch_and(!CONSUMER, AcqRel);
    }
}

unsafe impl<const CAP: usize, const ITEM: usize> Send for Consumer<'_, CAP, ITEM> {}

// === impl Reservation ===

impl<const CAP: usize, const ITEM: usize> Reservation<'_, CAP, ITEM> {
    /// The write index that [`commit`](Self::commit) will publish.
    #[must_use]
    pub fn candidate_index(&self) -> u16 {
        self.candidate
    }

    /// Publishes the reserved slot, making it visible to readers.
    pub fn commit(self) {
        self.ring.write.store(self.candidate, Release);
    }
}

impl<const CAP: usize, const ITEM: usize> Deref for Reservation<'_, CAP, ITEM> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.slot[..]
    }
}

impl<const CAP: usize, const ITEM: usize> DerefMut for Reservation<'_, CAP, ITEM> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.slot[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn four_slots_of_two_bytes() {
        let mut ring = SlotRing::<4, 2>::new();
        assert!(ring.is_empty());

        for i in 0..4u8 {
            ring.put(&[i, i + 10]).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.len(), 4);

        // a fifth put fails and changes nothing
        assert_eq!(ring.put(&[9, 9]), Err(Error::Full));
        assert!(ring.is_full());
        assert_eq!(ring.peek(), Some(&[0, 10][..]));

        let mut out = [0u8; 2];
        ring.get(&mut out).unwrap();
        assert_eq!(out, [0, 10]);
        assert!(!ring.is_full());
        assert!(!ring.is_empty());

        for i in 1..4u8 {
            ring.get(&mut out).unwrap();
            assert_eq!(out, [i, i + 10]);
        }
        assert!(ring.is_empty());
        assert_eq!(ring.get(&mut out), Err(Error::Empty));
        assert_eq!(ring.dequeue(), Err(Error::Empty));
        assert_eq!(ring.peek(), None);
    }

    #[test]
    fn short_items_are_padded() {
        let mut ring = SlotRing::<2, 4>::new();
        ring.put(&[1, 2, 3, 4]).unwrap();
        ring.dequeue().unwrap();
        // the slot previously held 1..=4; the short item must not leak them
        ring.put(&[7]).unwrap();
        ring.put(&[8]).unwrap();
        ring.dequeue().unwrap();
        assert_eq!(ring.peek(), Some(&[8, 0, 0, 0][..]));
        ring.dequeue().unwrap();

        ring.put(&[5]).unwrap();
        assert_eq!(ring.peek(), Some(&[5, 0, 0, 0][..]));
    }

    #[test]
    fn oversized_items_and_short_outputs() {
        let mut ring = SlotRing::<2, 2>::new();
        assert_eq!(ring.put(&[1, 2, 3]), Err(Error::ItemSize));
        assert!(ring.is_empty());

        ring.put(&[1, 2]).unwrap();
        let mut out = [0u8; 1];
        assert_eq!(ring.get(&mut out), Err(Error::ItemSize));
        assert_eq!(ring.len(), 1);

        // longer output buffers only have their prefix written
        let mut out = [0xAAu8; 3];
        ring.get(&mut out).unwrap();
        assert_eq!(out, [1, 2, 0xAA]);
    }

    #[test]
    fn reserve_then_commit() {
        let mut ring = SlotRing::<3, 4>::new();

        let mut rsv = ring.reserve().unwrap();
        assert_eq!(rsv.len(), 4);
        assert_eq!(rsv.candidate_index(), 1);
        rsv.copy_from_slice(&[1, 2, 3, 4]);
        drop(rsv);
        // an uncommitted reservation changes nothing
        assert!(ring.is_empty());

        let mut rsv = ring.reserve().unwrap();
        rsv.copy_from_slice(&[5, 6, 7, 8]);
        rsv.commit();
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.peek(), Some(&[5, 6, 7, 8][..]));
    }

    #[test]
    fn reserve_fails_when_full() {
        let mut ring = SlotRing::<1, 1>::new();
        ring.put(&[1]).unwrap();
        assert!(matches!(ring.reserve(), Err(Error::Full)));
    }

    #[test]
    fn reserved_slots_are_word_aligned() {
        let mut ring = SlotRing::<5, 3>::new();
        for _ in 0..12 {
            let rsv = ring.reserve().unwrap();
            assert_eq!(rsv.as_ptr() as usize % 4, 0);
            rsv.commit();
            ring.dequeue().unwrap();
        }
        assert_eq!(core::mem::size_of::<Slot<3>>(), 4);
        assert_eq!(core::mem::size_of::<Slot<5>>(), 8);
    }

    #[test]
    fn candidate_index_wraps_at_twice_capacity() {
        let mut ring = SlotRing::<2, 1>::new();
        let mut seen = Vec::new();
        for i in 0..6u8 {
            let mut rsv = ring.reserve().unwrap();
            seen.push(rsv.candidate_index());
            rsv[0] = i;
            rsv.commit();
            let mut out = [0u8];
            ring.get(&mut out).unwrap();
            assert_eq!(out, [i]);
        }
        assert_eq!(seen, [1, 2, 3, 0, 1, 2]);
    }

    #[test]
    fn reset_empties() {
        let mut ring = SlotRing::<3, 1>::new();
        ring.put(&[1]).unwrap();
        ring.put(&[2]).unwrap();
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 3);
        ring.put(&[3]).unwrap();
        assert_eq!(ring.peek(), Some(&[3][..]));
    }

    #[test]
    fn split_only_once() {
        let ring = SlotRing::<2, 1>::new();
        let (prod, cons) = ring.try_split().unwrap();
        assert!(matches!(ring.try_split(), Err(Error::AlreadySplit)));
        drop(prod);
        assert!(matches!(ring.try_split(), Err(Error::AlreadySplit)));
        drop(cons);
        assert!(ring.try_split().is_ok());
    }

    #[test]
    fn split_across_threads() {
        const N: u32 = 10_000;
        let ring = SlotRing::<8, 4>::new();
        let (mut prod, mut cons) = ring.try_split().unwrap();

        std::thread::scope(|s| {
            s.spawn(move || {
                let mut i = 0u32;
                while i < N {
                    if let Ok(mut rsv) = prod.reserve() {
                        rsv.copy_from_slice(&i.to_le_bytes());
                        rsv.commit();
                        i += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            });
            s.spawn(move || {
                let mut expected = 0u32;
                let mut out = [0u8; 4];
                while expected < N {
                    match cons.get(&mut out) {
                        Ok(()) => {
                            assert_eq!(u32::from_le_bytes(out), expected);
                            expected += 1;
                        }
                        Err(Error::Empty) => std::thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e:?}"),
                    }
                }
            });
        });

        assert!(ring.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Get,
        Reserve { commit: bool, val: u8 },
        Dequeue,
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Put),
            Just(Op::Get),
            (any::<bool>(), any::<u8>()).prop_map(|(commit, val)| Op::Reserve { commit, val }),
            Just(Op::Dequeue),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_vecdeque(ops in proptest::collection::vec(op(), 0..128)) {
            const CAP: usize = 5;
            let mut ring = SlotRing::<CAP, 2>::new();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(v) => {
                        let res = ring.put(&[v, !v]);
                        if model.len() == CAP {
                            prop_assert_eq!(res, Err(Error::Full));
                        } else {
                            prop_assert_eq!(res, Ok(()));
                            model.push_back(v);
                        }
                    }
                    Op::Get => {
                        let mut out = [0u8; 2];
                        match model.pop_front() {
                            Some(v) => {
                                prop_assert_eq!(ring.get(&mut out), Ok(()));
                                prop_assert_eq!(out, [v, !v]);
                            }
                            None => prop_assert_eq!(ring.get(&mut out), Err(Error::Empty)),
                        }
                    }
                    Op::Reserve { commit, val } => match ring.reserve() {
                        Ok(mut rsv) => {
                            prop_assert!(model.len() < CAP);
                            rsv.copy_from_slice(&[val, !val]);
                            if commit {
                                rsv.commit();
                                model.push_back(val);
                            }
                        }
                        Err(e) => {
                            prop_assert_eq!(e, Error::Full);
                            prop_assert_eq!(model.len(), CAP);
                        }
                    },
                    Op::Dequeue => {
                        let expected = if model.pop_front().is_some() { Ok(()) } else { Err(Error::Empty) };
                        prop_assert_eq!(ring.dequeue(), expected);
                    }
                    Op::Reset => {
                        ring.reset();
                        model.clear();
                    }
                }

                prop_assert_eq!(ring.len(), model.len());
                prop_assert_eq!(ring.len() + ring.free(), ring.capacity());
                prop_assert_eq!(ring.is_full(), model.len() == CAP);
                prop_assert_eq!(ring.is_empty(), model.is_empty());
                let head = model.front().map(|&v| [v, !v]);
                prop_assert_eq!(ring.peek().map(|p| [p[0], p[1]]), head);
            }
        }
    }
}
