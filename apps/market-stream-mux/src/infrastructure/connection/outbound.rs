//! Bounded outbound control-frame queue.
//!
//! Frames wait here until the connection driver flushes them. On overflow the
//! oldest frame is discarded.

use std::collections::VecDeque;

use crate::domain::subscription::ControlFrame;

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// FIFO queue of control frames with a drop-oldest overflow policy.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<ControlFrame>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(DEFAULT_OUTBOUND_CAPACITY)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a frame. Returns the evicted frame if the queue was full.
    pub fn push(&mut self, frame: ControlFrame) -> Option<ControlFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.dropped = self.dropped.saturating_add(1);
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Take every queued frame in FIFO order.
    pub fn drain(&mut self) -> Vec<ControlFrame> {
        self.frames.drain(..).collect()
    }

    /// Number of queued frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Maximum number of queued frames.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted since creation.
    #[must_use]
    pub const fn dropped_total(&self) -> u64 {
        self.dropped
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topic::{StreamKind, Topic};

    fn sub(symbol: &str) -> ControlFrame {
        ControlFrame::subscribe(Topic::new(StreamKind::Trade, symbol).unwrap())
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(4);
        assert!(queue.push(sub("A")).is_none());
        assert!(queue.push(sub("B")).is_none());

        let frames = queue.drain();
        assert_eq!(frames, vec![sub("A"), sub("B")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(sub("A"));
        queue.push(sub("B"));

        let evicted = queue.push(sub("C"));

        assert_eq!(evicted, Some(sub("A")));
        assert_eq!(queue.dropped_total(), 1);
        assert_eq!(queue.drain(), vec![sub("B"), sub("C")]);
    }

    #[test]
    fn zero_capacity_holds_one_frame() {
        let mut queue = OutboundQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(sub("A"));
        queue.push(sub("B"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain(), vec![sub("B")]);
    }
}
