//! Bounded capture-frame queue with drop-oldest overflow.
//!
//! The capture side must never block, so [`FrameQueue::push`] always
//! succeeds: when the queue is full the oldest unconsumed frame is dropped
//! and counted. The coordinator drains the overrun counter with
//! [`FrameQueue::take_dropped`] and reports it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use parley_core::AudioFrame;
use tokio::sync::Notify;

/// Single-consumer queue of capture frames.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a frame. Returns `false` if an older frame had to be dropped
    /// to make room.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let overflowed = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let overflowed = frames.len() >= self.capacity;
            if overflowed {
                frames.pop_front();
            }
            frames.push_back(frame);
            overflowed
        };

        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        !overflowed
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// drained.
    ///
    /// Cancel safe: dropping the future never loses a frame.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next frame without waiting.
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Frames dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the queue closed. Frames already queued can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
