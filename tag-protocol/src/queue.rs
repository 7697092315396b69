// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Lock-free single producer, single consumer queue of byte frames.
//!
//! The scan loop produces telemetry frames, the publisher consumes them. The
//! producer never waits: when every slot is taken the new frame is dropped
//! and counted. One slot is always kept free, so `N` slots hold `N - 1`
//! frames.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

pub struct BytesQueue<const N: usize, const M: usize> {
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicU32,
    slots: [Slot<M>; N],
}

struct Slot<const M: usize> {
    buf: UnsafeCell<[u8; M]>,
    len: AtomicUsize,
    full: AtomicBool,
}

impl<const M: usize> Slot<M> {
    const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; M]),
            len: AtomicUsize::new(0),
            full: AtomicBool::new(false),
        }
    }
}

impl<const N: usize, const M: usize> Default for BytesQueue<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const M: usize> BytesQueue<N, M> {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicU32::new(0),
            slots: [const { Slot::new() }; N],
        }
    }

    #[inline]
    fn next(idx: usize) -> usize {
        (idx + 1) % N
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        Self::next(self.tail.load(Ordering::Acquire)) == self.head.load(Ordering::Acquire)
    }

    /// Number of frames refused because the queue was full or the frame too
    /// large.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Producer borrows a free slot.
    #[allow(clippy::mut_from_ref)]
    pub fn send(&self) -> Option<&mut [u8; M]> {
        if self.is_full() {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail];
        if slot.full.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: only producer touches this slot until send_done
        Some(unsafe { &mut *slot.buf.get() })
    }

    pub fn send_done(&self, len: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail];
        slot.len.store(len.min(M), Ordering::Release);
        slot.full.store(true, Ordering::Release);
        self.tail.store(Self::next(tail), Ordering::Release);
    }

    /// Copy a frame into the queue. Returns `false` and counts a drop when
    /// there is no room for it.
    pub fn push(&self, frame: &[u8]) -> bool {
        if frame.len() > M {
            self.count_drop();
            return false;
        }
        match self.send() {
            Some(buf) => {
                buf[..frame.len()].copy_from_slice(frame);
                self.send_done(frame.len());
                true
            }
            None => {
                self.count_drop();
                false
            }
        }
    }

    /// Count a frame the producer could not build, such as one that
    /// overflowed `M` while encoding.
    pub fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer borrows the next filled slot.
    pub fn receive(&self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head];
        if !slot.full.load(Ordering::Acquire) {
            return None;
        }
        let len = slot.len.load(Ordering::Acquire);
        // SAFETY: the producer does not touch a full slot
        let buf = unsafe { &*slot.buf.get() };
        Some(&buf[..len])
    }

    pub fn receive_done(&self) {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head];
        slot.full.store(false, Ordering::Release);
        self.head.store(Self::next(head), Ordering::Release);
    }
}

// Safety: SPSC only, one producer thread and one consumer thread.
unsafe impl<const N: usize, const M: usize> Sync for BytesQueue<N, M> {}
