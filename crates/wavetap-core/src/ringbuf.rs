//! Bounded SPSC byte ring buffer with contiguous reserve/peek windows.
//!
//! The buffer backs the IO path between a capture thread and the protocol
//! loop: the writer reserves a contiguous region, fills it, and commits the
//! bytes actually used; the reader peeks a contiguous window, parses what it
//! can, and consumes complete frames. Wrap-around is hidden from callers by
//! staging split operations through a temporary buffer, so a reservation or
//! peek window is always a single slice.
//!
//! At most one reservation and one peek may be outstanding at a time;
//! overlapping zero-copy operations are a programming error and panic.

use std::ops::{Deref, DerefMut};

/// Fixed-capacity byte FIFO with one producer and one consumer.
pub struct RingBuf {
    buf: Vec<u8>,
    start: usize,
    len: usize,
    mid_peek: bool,
    mid_commit: bool,
}

impl RingBuf {
    /// Create a ring holding at most `size` bytes.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "ring buffer size must be non-zero");
        Self {
            buf: vec![0u8; size],
            start: 0,
            len: 0,
            mid_peek: false,
            mid_commit: false,
        }
    }

    /// Total capacity in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently queued.
    pub fn used(&self) -> usize {
        self.len
    }

    /// Free space remaining.
    pub fn available(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Drop all queued data.
    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    /// Append `data`, all or nothing.  Returns the number of bytes written,
    /// which is `data.len()` on success and 0 when the ring lacks room.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.available() < data.len() {
            return 0;
        }

        let copy_start = (self.start + self.len) % self.buf.len();

        if copy_start + data.len() <= self.buf.len() {
            self.buf[copy_start..copy_start + data.len()].copy_from_slice(data);
        } else {
            let chunk_a = self.buf.len() - copy_start;
            self.buf[copy_start..].copy_from_slice(&data[..chunk_a]);
            self.buf[..data.len() - chunk_a].copy_from_slice(&data[chunk_a..]);
        }

        self.len += data.len();
        data.len()
    }

    /// Consume up to `sz` bytes.  When `dst` is provided the consumed bytes
    /// are copied into it; a `None` destination discards them.  Returns the
    /// number of bytes consumed.
    pub fn read(&mut self, dst: Option<&mut [u8]>, sz: usize) -> usize {
        let opsize = self.len.min(sz);
        if opsize == 0 {
            return 0;
        }

        if let Some(dst) = dst {
            self.copy_out(&mut dst[..opsize]);
        }

        self.start = (self.start + opsize) % self.buf.len();
        self.len -= opsize;
        opsize
    }

    /// Copy up to `dst.len()` bytes without consuming them.  Returns the
    /// number of bytes copied.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let opsize = self.len.min(dst.len());
        if opsize == 0 {
            return 0;
        }
        self.copy_out(&mut dst[..opsize]);
        opsize
    }

    /// Reserve a contiguous writable region of exactly `sz` bytes, or `None`
    /// when the ring lacks room.  The region is published by
    /// [`Reservation::commit`] and abandoned by [`Reservation::free`] (or by
    /// dropping it).
    ///
    /// Panics if a reservation is already outstanding.
    pub fn reserve(&mut self, sz: usize) -> Option<Reservation<'_>> {
        assert!(!self.mid_commit, "ring buffer reserve while mid-commit");

        if self.available() < sz {
            return None;
        }

        self.mid_commit = true;
        Some(Reservation {
            staging: vec![0u8; sz],
            ring: self,
        })
    }

    /// Yield a contiguous read window of up to `sz` bytes without consuming
    /// them.  A `sz` of 0 requests everything queued.  The window is released
    /// when the guard drops.
    ///
    /// Panics if a peek is already outstanding.
    pub fn peek_zc(&mut self, sz: usize) -> PeekGuard<'_> {
        assert!(!self.mid_peek, "ring buffer peek while mid-peek");
        self.mid_peek = true;

        let want = if sz == 0 { self.buf.len() } else { sz };
        let opsize = self.len.min(want);

        let data = if self.start + opsize <= self.buf.len() {
            PeekData::Direct {
                start: self.start,
                len: opsize,
            }
        } else {
            let mut copy = vec![0u8; opsize];
            self.copy_out(&mut copy);
            PeekData::Staged(copy)
        };

        PeekGuard { ring: self, data }
    }

    /// Logical offset of the first occurrence of `b`, scanning from the read
    /// position across the wrap, or `None` when absent.  Used by helpers that
    /// frame newline-terminated sub-protocols.
    pub fn search_byte(&self, b: u8) -> Option<usize> {
        (0..self.len).find(|pos| self.buf[(self.start + pos) % self.buf.len()] == b)
    }

    fn copy_out(&self, dst: &mut [u8]) {
        let opsize = dst.len();
        if self.start + opsize <= self.buf.len() {
            dst.copy_from_slice(&self.buf[self.start..self.start + opsize]);
        } else {
            let chunk_a = self.buf.len() - self.start;
            dst[..chunk_a].copy_from_slice(&self.buf[self.start..]);
            dst[chunk_a..].copy_from_slice(&self.buf[..opsize - chunk_a]);
        }
    }

    fn commit_staging(&mut self, staging: &[u8], used: usize) {
        assert!(self.mid_commit, "ring buffer commit without reservation");
        assert!(used <= staging.len(), "commit longer than reservation");

        self.mid_commit = false;

        let copy_start = (self.start + self.len) % self.buf.len();
        if copy_start + used <= self.buf.len() {
            self.buf[copy_start..copy_start + used].copy_from_slice(&staging[..used]);
        } else {
            let chunk_a = self.buf.len() - copy_start;
            self.buf[copy_start..].copy_from_slice(&staging[..chunk_a]);
            self.buf[..used - chunk_a].copy_from_slice(&staging[chunk_a..used]);
        }

        self.len += used;
    }
}

/// Outstanding write reservation.  Deref yields the writable region.
pub struct Reservation<'a> {
    ring: &'a mut RingBuf,
    staging: Vec<u8>,
}

impl Reservation<'_> {
    /// Publish the first `used` bytes of the region into the ring.
    pub fn commit(mut self, used: usize) {
        let staging = std::mem::take(&mut self.staging);
        self.ring.commit_staging(&staging, used);
    }

    /// Abandon the reservation without publishing anything.
    pub fn free(self) {
        drop(self);
    }
}

impl Deref for Reservation<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.staging
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.staging
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.ring.mid_commit = false;
    }
}

enum PeekData {
    Direct { start: usize, len: usize },
    Staged(Vec<u8>),
}

/// Outstanding zero-copy read window.  Deref yields the peeked bytes; the
/// window is released when the guard drops.
pub struct PeekGuard<'a> {
    ring: &'a mut RingBuf,
    data: PeekData,
}

impl Deref for PeekGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            PeekData::Direct { start, len } => &self.ring.buf[*start..*start + *len],
            PeekData::Staged(copy) => copy,
        }
    }
}

impl Drop for PeekGuard<'_> {
    fn drop(&mut self) {
        self.ring.mid_peek = false;
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuf;

    #[test]
    fn used_plus_available_is_size() {
        let mut ring = RingBuf::new(16);
        assert_eq!(ring.used() + ring.available(), 16);

        assert_eq!(ring.write(b"hello"), 5);
        assert_eq!(ring.used() + ring.available(), 16);
        assert_eq!(ring.used(), 5);

        let mut out = [0u8; 3];
        assert_eq!(ring.read(Some(&mut out), 3), 3);
        assert_eq!(&out, b"hel");
        assert_eq!(ring.used() + ring.available(), 16);
        assert_eq!(ring.used(), 2);
    }

    #[test]
    fn write_is_all_or_nothing() {
        let mut ring = RingBuf::new(4);
        assert_eq!(ring.write(b"abcde"), 0);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.write(b"abcd"), 4);
        assert_eq!(ring.write(b"x"), 0);
    }

    #[test]
    fn wrap_around_read_back() {
        // Size 8: write 4, consume 4, then a 6-byte write wraps the ring.
        let mut ring = RingBuf::new(8);
        assert_eq!(ring.write(b"AAAA"), 4);
        assert_eq!(ring.read(None, 4), 4);
        assert_eq!(ring.write(b"BBBBBB"), 6);

        let mut out = [0u8; 6];
        assert_eq!(ring.read(Some(&mut out), 6), 6);
        assert_eq!(&out, b"BBBBBB");
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn reserve_commit_publishes_only_used_bytes() {
        let mut ring = RingBuf::new(8);

        let mut res = ring.reserve(6).expect("room for 6");
        res[..3].copy_from_slice(b"abc");
        res.commit(3);

        assert_eq!(ring.used(), 3);
        let mut out = [0u8; 3];
        ring.peek(&mut out);
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn reserve_free_publishes_nothing() {
        let mut ring = RingBuf::new(8);
        let res = ring.reserve(4).expect("room");
        res.free();
        assert_eq!(ring.used(), 0);

        // A fresh reservation is allowed after the old one was abandoned.
        let res = ring.reserve(8).expect("full-size reservation");
        res.commit(8);
        assert_eq!(ring.used(), 8);
        assert!(ring.reserve(1).is_none());
    }

    #[test]
    fn reserve_commit_across_wrap() {
        let mut ring = RingBuf::new(8);
        ring.write(b"AAAAAA");
        ring.read(None, 6);

        // Write head is at offset 6; a 5-byte commit must wrap.
        let mut res = ring.reserve(5).expect("room");
        res.copy_from_slice(b"wrap!");
        res.commit(5);

        let mut out = [0u8; 5];
        assert_eq!(ring.read(Some(&mut out), 5), 5);
        assert_eq!(&out, b"wrap!");
    }

    #[test]
    fn peek_zc_contiguous_and_staged() {
        let mut ring = RingBuf::new(8);
        ring.write(b"abcd");
        {
            let peek = ring.peek_zc(4);
            assert_eq!(&*peek, b"abcd");
        }
        // Not consumed.
        assert_eq!(ring.used(), 4);

        ring.read(None, 4);
        ring.write(b"efghij");
        {
            // Spans the wrap, so the window is staged but still contiguous.
            let peek = ring.peek_zc(0);
            assert_eq!(&*peek, b"efghij");
        }
        assert_eq!(ring.used(), 6);
    }

    #[test]
    fn search_byte_across_wrap() {
        let mut ring = RingBuf::new(8);
        ring.write(b"AAAAAA");
        ring.read(None, 6);
        ring.write(b"abc\ndef");

        assert_eq!(ring.search_byte(b'\n'), Some(3));
        assert_eq!(ring.search_byte(b'z'), None);
    }

    #[test]
    #[should_panic(expected = "commit longer than reservation")]
    fn commit_longer_than_reservation_panics() {
        let mut ring = RingBuf::new(8);
        let res = ring.reserve(2).expect("room");
        res.commit(3);
    }
}
