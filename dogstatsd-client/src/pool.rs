//! Pooled payload buffers.

use std::sync::atomic::{
    AtomicU64, AtomicUsize,
    Ordering::{AcqRel, Acquire, Relaxed},
};

use crossbeam_queue::ArrayQueue;

/// A fixed-capacity buffer holding one or more newline-delimited metrics.
///
/// Each buffer becomes exactly one payload (datagram) when sent. Buffers are moved by value between the handler that
/// fills them, the dispatch queue, the sender worker that writes them out, and the pool that recycles them, so only
/// one component ever owns a given buffer at a time.
#[derive(Debug)]
pub struct StatsdBuffer {
    buf: Vec<u8>,
    max_len: usize,
    max_elements: usize,
    elements: usize,
    tracked: bool,
}

impl StatsdBuffer {
    fn new(max_len: usize, max_elements: usize, tracked: bool) -> Self {
        Self { buf: Vec::with_capacity(max_len), max_len, max_elements, elements: 0, tracked }
    }

    /// Creates an untracked buffer holding a single line that is too large for a pooled buffer.
    pub(crate) fn oversized(line: Vec<u8>) -> Self {
        let max_len = line.len();
        Self { buf: line, max_len, max_elements: 1, elements: 1, tracked: false }
    }

    /// Creates a zero-capacity, untracked buffer that owns no allocation.
    pub(crate) fn detached() -> Self {
        Self::new(0, 0, false)
    }

    /// Returns the buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the maximum number of bytes this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.max_len
    }

    /// Returns the number of bytes that can still be written.
    pub fn remaining(&self) -> usize {
        self.max_len - self.buf.len()
    }

    /// Returns the number of metrics written.
    pub fn elements(&self) -> usize {
        self.elements
    }

    pub(crate) fn has_element_room(&self) -> bool {
        self.elements < self.max_elements
    }

    pub(crate) fn fits(&self, len: usize) -> bool {
        len <= self.remaining()
    }

    /// Appends one complete metric line, built from its parts.
    ///
    /// Callers must check [`fits`][Self::fits] and [`has_element_room`][Self::has_element_room] first.
    pub(crate) fn write_line(&mut self, parts: &[&[u8]]) {
        debug_assert!(self.has_element_room());
        debug_assert!(self.fits(parts.iter().copied().map(<[u8]>::len).sum()));

        for part in parts {
            self.buf.extend_from_slice(part);
        }
        self.elements += 1;
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.elements = 0;
    }
}

/// Buffer pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfiguration {
    /// Number of buffers allocated up front.
    pub initial_buffers: usize,

    /// Maximum number of buffers tracked by the pool.
    pub max_buffers: usize,

    /// Capacity of each buffer, in bytes.
    pub buffer_len: usize,

    /// Maximum number of metrics written into a single buffer.
    pub max_elements: usize,
}

/// Buffer pool statistics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Borrows served by a free buffer.
    pub reused: u64,

    /// Tracked buffers allocated, including the initial ones.
    pub allocated: u64,

    /// Untracked buffers allocated because the pool was at its maximum size.
    pub transient: u64,

    /// Buffers discarded on release instead of being returned to the free set.
    pub discarded: u64,
}

/// A bounded pool of reusable payload buffers.
///
/// The pool allocates its initial buffers up front, and then grows lazily up to its maximum size. When every tracked
/// buffer is checked out, [`borrow`][Self::borrow] hands out a transient buffer instead of blocking. Transient buffers
/// are discarded when released, so the free set never holds more than the maximum number of buffers.
///
/// All operations are lock-free and safe to call from any number of threads.
pub struct BufferPool {
    free: ArrayQueue<StatsdBuffer>,
    tracked: AtomicUsize,
    buffer_len: usize,
    max_elements: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
    transient: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    /// Creates a new `BufferPool` from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if `max_buffers` is zero.
    pub fn new(config: &PoolConfiguration) -> Self {
        let pool = Self {
            free: ArrayQueue::new(config.max_buffers),
            tracked: AtomicUsize::new(0),
            buffer_len: config.buffer_len,
            max_elements: config.max_elements,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            transient: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        };

        for _ in 0..config.initial_buffers.min(config.max_buffers) {
            if let Some(buffer) = pool.try_allocate_tracked() {
                pool.release(buffer);
            }
        }

        pool
    }

    /// Returns the capacity of each buffer, in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_len
    }

    /// Returns the maximum number of buffers tracked by the pool.
    pub fn max_buffers(&self) -> usize {
        self.free.capacity()
    }

    /// Returns the number of free buffers.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Returns a snapshot of the pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Relaxed),
            allocated: self.allocated.load(Relaxed),
            transient: self.transient.load(Relaxed),
            discarded: self.discarded.load(Relaxed),
        }
    }

    /// Borrows an empty buffer.
    ///
    /// This never blocks: a free buffer is reused if there is one, otherwise a new tracked buffer is allocated if the
    /// pool has not reached its maximum size, and otherwise a transient buffer is allocated.
    pub fn borrow(&self) -> StatsdBuffer {
        if let Some(buffer) = self.free.pop() {
            self.reused.fetch_add(1, Relaxed);
            return buffer;
        }

        if let Some(buffer) = self.try_allocate_tracked() {
            return buffer;
        }

        self.transient.fetch_add(1, Relaxed);
        StatsdBuffer::new(self.buffer_len, self.max_elements, false)
    }

    /// Releases a buffer back to the pool.
    ///
    /// Tracked buffers are cleared and returned to the free set. Transient buffers, and buffers that did not come from
    /// this pool, are dropped.
    pub fn release(&self, mut buffer: StatsdBuffer) {
        if !buffer.tracked || buffer.max_len != self.buffer_len {
            self.discarded.fetch_add(1, Relaxed);
            return;
        }

        buffer.reset();
        if self.free.push(buffer).is_err() {
            self.discarded.fetch_add(1, Relaxed);
        }
    }

    fn try_allocate_tracked(&self) -> Option<StatsdBuffer> {
        let max = self.free.capacity();
        let mut current = self.tracked.load(Acquire);
        loop {
            if current >= max {
                return None;
            }

            match self.tracked.compare_exchange_weak(current, current + 1, AcqRel, Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.allocated.fetch_add(1, Relaxed);
        Some(StatsdBuffer::new(self.buffer_len, self.max_elements, true))
    }
}
