//! The hardware sample ringbuffer between ISR context and the engine.
//!
//! # Design
//! This queue is the only data shared between producer contexts (interrupt
//! handlers or polling loops) and the engine. Producers push raw samples
//! without ever blocking; when the queue is full the oldest sample is shed
//! and counted. The engine drains it at the start of each tick.
//!
//! The storage is a lock-free multi-producer queue with compile-time
//! capacity; a runtime limit can cap the usable depth below that.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use heapless::mpmc::MpMcQueue;

use crate::SAMPLE_QUEUE_DEPTH;

/// One raw hardware sample as captured in interrupt context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawSample {
    /// Hardware source id, bound to a signal slot by the input map.
    pub source: u16,
    pub value: u32,
    pub timestamp_us: u64,
}

/// Lock-free drop-oldest sample queue.
///
/// `push` may be called from any number of producer contexts concurrently;
/// `pop` only from the engine context.
pub struct SampleQueue {
    queue: MpMcQueue<RawSample, SAMPLE_QUEUE_DEPTH>,
    /// Approximate occupancy; transiently overcounts during a push.
    depth: AtomicUsize,
    limit: AtomicUsize,
    pushed: AtomicU32,
    dropped: AtomicU32,
}

impl SampleQueue {
    pub const fn new() -> Self {
        SampleQueue {
            queue: MpMcQueue::new(),
            depth: AtomicUsize::new(0),
            limit: AtomicUsize::new(SAMPLE_QUEUE_DEPTH),
            pushed: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Cap the usable depth at runtime. Clamped to the compile-time storage.
    pub fn set_limit(&self, limit: usize) {
        self.limit
            .store(limit.clamp(1, SAMPLE_QUEUE_DEPTH), Ordering::Relaxed);
    }

    /// Push a sample, shedding the oldest entries if the queue is at its
    /// limit. Never blocks.
    pub fn push(&self, sample: RawSample) {
        self.pushed.fetch_add(1, Ordering::Relaxed);

        while self.depth.load(Ordering::Relaxed) >= self.limit.load(Ordering::Relaxed)
        {
            match self.queue.dequeue() {
                Some(_) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        let mut sample = sample;
        for _ in 0..SAMPLE_QUEUE_DEPTH {
            self.depth.fetch_add(1, Ordering::Relaxed);
            match self.queue.enqueue(sample) {
                Ok(()) => return,
                Err(rejected) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    sample = rejected;
                    if self.queue.dequeue().is_some() {
                        self.depth.fetch_sub(1, Ordering::Relaxed);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        // Pathological producer contention: shed the new sample instead.
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop the oldest sample, or `None` when drained. Engine context only.
    pub fn pop(&self) -> Option<RawSample> {
        self.queue.dequeue().map(|sample| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            sample
        })
    }

    /// Total samples ever pushed (wrapping).
    pub fn pushed(&self) -> u32 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total samples shed on overflow (wrapping).
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(source: u16, value: u32) -> RawSample {
        RawSample {
            source,
            value,
            timestamp_us: 0,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = SampleQueue::new();
        for i in 0..8 {
            queue.push(sample(0, i));
        }
        for i in 0..8 {
            assert_eq!(queue.pop().unwrap().value, i);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let queue = SampleQueue::new();
        queue.set_limit(4);
        for i in 0..6 {
            queue.push(sample(0, i));
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.pushed(), 6);
        // Values 0 and 1 were shed, 2..=5 remain in order.
        for i in 2..6 {
            assert_eq!(queue.pop().unwrap().value, i);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn popped_never_exceeds_pushed() {
        let queue = SampleQueue::new();
        queue.set_limit(3);
        let mut popped = 0u32;
        for i in 0..50 {
            queue.push(sample(1, i));
            if i % 3 == 0 {
                while queue.pop().is_some() {
                    popped += 1;
                }
            }
        }
        while queue.pop().is_some() {
            popped += 1;
        }
        assert_eq!(popped + queue.dropped(), queue.pushed());
    }
}
