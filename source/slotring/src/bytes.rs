//! A byte-granular ring buffer.
//!
//! [`ByteRing`] uses the same doubled-index scheme as [`SlotRing`], with
//! `u32` indices and single-byte slots. Writes and reads are partial: they
//! move as many bytes as currently fit (or are available) and report how
//! many that was.
//!
//! [`SlotRing`]: crate::SlotRing

use core::cmp::min;

/// The largest number of bytes a [`ByteRing`] may hold.
pub const MAX_CAPACITY: usize = (u32::MAX / 2) as usize;

/// A ring of `CAP` bytes.
pub struct ByteRing<const CAP: usize> {
    buf: [u8; CAP],
    read: u32,
    write: u32,
}

impl<const CAP: usize> ByteRing<CAP> {
    const CAPACITY_OK: () = assert!(
        CAP > 0 && CAP <= MAX_CAPACITY,
        "byte ring capacity must be in 1..=MAX_CAPACITY"
    );

    const WRAP: u32 = (CAP * 2) as u32;

    #[must_use]
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Self {
            buf: [0; CAP],
            read: 0,
            write: 0,
        }
    }

    /// Writes as much of `data` as fits, returning the number of bytes
    /// written.
    pub fn put(&mut self, data: &[u8]) -> usize {
        let n = min(data.len(), self.free());
        let start = self.write as usize % CAP;
        let first = min(n, CAP - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.write = Self::advance(self.write, n);
        n
    }

    /// Reads up to `out.len()` bytes into `out`, returning the number of
    /// bytes read.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let n = min(out.len(), self.len());
        let start = self.read as usize % CAP;
        let first = min(n, CAP - start);
        out[..first].copy_from_slice(&self.buf[start..start + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.read = Self::advance(self.read, n);
        n
    }

    /// Empties the ring. The stored bytes are left as they are.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Returns the number of bytes available to read.
    #[must_use]
    pub fn len(&self) -> usize {
        let used = if self.write >= self.read {
            self.write - self.read
        } else {
            Self::WRAP - (self.read - self.write)
        };
        used as usize
    }

    /// Returns the number of bytes that may be written.
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
    fn advance(idx: u32, n: usize) -> u32 {
        // `n <= CAP`, so one subtraction brings the index back in range.
        let next = idx as u64 + n as u64;
        if next >= Self::WRAP as u64 {
            (next - Self::WRAP as u64) as u32
        } else {
            next as u32
        }
    }
}

impl<const CAP: usize> Default for ByteRing<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> core::fmt::Debug for ByteRing<CAP> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteRing")
            .field("capacity", &CAP)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
