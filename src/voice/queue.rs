//! Bounded outbound frame queue
//!
//! The capture callback runs on the audio thread and must never block, so
//! when the transport stalls the oldest frames are dropped instead.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

use super::codec::AudioFrame;

/// Drop-oldest queue between capture and the transport sender
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    frames: Mutex<VecDeque<AudioFrame>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame, evicting the oldest when full
    ///
    /// Returns `false` if the queue is closed and the frame was discarded.
    pub fn push(&self, frame: AudioFrame) -> bool {
        if self.is_closed() {
            return false;
        }

        let Ok(mut frames) = self.frames.lock() else {
            return false;
        };

        if frames.len() >= self.capacity {
            frames.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                tracing::warn!(dropped = total, "send queue full, dropping oldest frames");
            }
        }
        frames.push_back(frame);
        drop(frames);

        self.notify.notify_one();
        true
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();

            if self.is_closed() {
                return None;
            }
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }

            notified.await;
        }
    }

    /// Take the next frame without waiting
    #[must_use]
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames.lock().ok()?.pop_front()
    }

    /// Close the queue, discard pending frames and wake the consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or_default()
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::codec::encode;

    #[test]
    fn test_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        queue.push(encode(&[0.1]));
        queue.push(encode(&[0.2]));
        queue.push(encode(&[0.3]));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(encode(&[0.2])));
        assert_eq!(queue.try_pop(), Some(encode(&[0.3])));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_rejects_frames() {
        let queue = FrameQueue::new(4);
        queue.push(encode(&[0.1]));
        queue.close();

        assert!(!queue.push(encode(&[0.2])));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_waits_for_push() {
        let queue = FrameQueue::new(4);
        let mut pop = tokio_test::task::spawn(queue.pop());
        tokio_test::assert_pending!(pop.poll());

        queue.push(encode(&[0.5]));

        assert!(pop.is_woken());
        tokio_test::assert_ready_eq!(pop.poll(), Some(encode(&[0.5])));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = std::sync::Arc::new(FrameQueue::new(4));
        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        assert_eq!(consumer.await.unwrap(), None);
    }
}
