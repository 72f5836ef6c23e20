use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::shared::frame::Frame;

/// How often a blocked producer re-checks for cancellation.
const BLOCK_POLL: Duration = Duration::from_millis(20);

/// What the capture side does when processing has not caught up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Replace the oldest unconsumed frame (live sources).
    DropOldest,
    /// Wait for space (file sources).
    Block,
}

/// A frame on its way from capture to processing.
#[derive(Debug)]
pub struct CapturedFrame {
    /// Capture order within the current source, starting at 0.
    pub sequence: u64,
    pub frame: Frame,
}

/// Outcome of pushing a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// Queued after evicting this many older frames.
    Replaced(u64),
    /// The consumer is gone or the run was cancelled.
    Closed,
}

/// Producer half of the bounded capture-to-processing queue.
pub struct FrameQueueProducer {
    tx: Sender<CapturedFrame>,
    /// Present only for `DropOldest`, so the producer can evict. Holding a
    /// receiver keeps the channel open, so `Block` queues never carry one.
    evict: Option<Receiver<CapturedFrame>>,
    cancel: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

/// Builds a queue of `capacity` frames with the given overflow policy.
pub fn frame_queue(
    capacity: usize,
    policy: OverflowPolicy,
    cancel: Arc<AtomicBool>,
) -> (FrameQueueProducer, Receiver<CapturedFrame>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let evict = match policy {
        OverflowPolicy::DropOldest => Some(rx.clone()),
        OverflowPolicy::Block => None,
    };
    let producer = FrameQueueProducer {
        tx,
        evict,
        cancel,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (producer, rx)
}

impl FrameQueueProducer {
    pub fn push(&self, item: CapturedFrame) -> Push {
        match &self.evict {
            Some(evict) => self.push_replacing(item, evict),
            None => self.push_blocking(item),
        }
    }

    fn push_replacing(&self, mut item: CapturedFrame, evict: &Receiver<CapturedFrame>) -> Push {
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) if evicted == 0 => return Push::Queued,
                Ok(()) => return Push::Replaced(evicted),
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if evict.try_recv().is_ok() {
                        evicted += 1;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Push::Closed,
            }
            // The evict receiver keeps the channel alive after processing
            // exits, so cancellation is the only other way out.
            if self.cancel.load(Ordering::Relaxed) {
                return Push::Closed;
            }
        }
    }

    fn push_blocking(&self, mut item: CapturedFrame) -> Push {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Push::Closed;
            }
            match self.tx.send_timeout(item, BLOCK_POLL) {
                Ok(()) => return Push::Queued,
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Push::Closed,
            }
        }
    }

    /// Frames currently waiting for processing.
    pub fn depth(&self) -> usize {
        self.tx.len()
    }

    /// Frames evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
