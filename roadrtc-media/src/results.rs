//! Bounded hand-off of detection results from the frame pipeline to a display loop
//!
//! The producer side never waits: when the queue is full, one item is dropped
//! according to the configured [`OverflowPolicy`] and the drop is counted. The
//! consumer drains queued items before it observes the channel as closed.

use crate::detection::DetectionList;
use crate::error::{MediaError, MediaResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// What to discard when a full channel receives another item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item, keeping the freshest results
    #[default]
    DropOldest,
    /// Discard the incoming item
    DropNewest,
}

/// Result channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultChannelConfig {
    /// Maximum number of queued lists
    pub capacity: usize,
    /// Behaviour when full
    pub overflow: OverflowPolicy,
}

impl Default for ResultChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl ResultChannelConfig {
    /// Keep only the most recent list
    pub fn latest_only() -> Self {
        Self {
            capacity: 1,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    pub fn validate(&self) -> MediaResult<()> {
        if self.capacity == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "result channel capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a [`ResultSender::publish`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Queued without loss
    Queued,
    /// Queued after evicting the oldest item
    EvictedOldest,
    /// The new item was discarded
    Discarded,
    /// Nobody is listening any more
    Closed,
}

/// Result of a bounded wait on the receiver
#[derive(Debug, Clone, PartialEq)]
pub enum RecvOutcome {
    /// A list arrived
    Item(DetectionList),
    /// Nothing arrived in time; the channel is still open
    Timeout,
    /// Producer is gone and the queue is drained
    Closed,
}

/// Error returned by [`ResultReceiver::try_recv`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing queued right now
    #[error("result channel is empty")]
    Empty,
    /// Producer is gone and the queue is drained
    #[error("result channel is closed")]
    Closed,
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<DetectionList>,
    sender_closed: bool,
    receiver_closed: bool,
    published: u64,
    dropped: u64,
}

#[derive(Debug)]
struct Shared {
    config: ResultChannelConfig,
    inner: Mutex<Inner>,
    notify: Notify,
}

/// Factory for result channel halves
#[derive(Debug)]
pub struct ResultChannel;

impl ResultChannel {
    /// Create a bounded channel
    pub fn bounded(config: ResultChannelConfig) -> MediaResult<(ResultSender, ResultReceiver)> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Capacity-1 channel that always holds the newest list
    pub fn latest_only() -> (ResultSender, ResultReceiver) {
        Self::build(ResultChannelConfig::latest_only())
    }

    fn build(config: ResultChannelConfig) -> (ResultSender, ResultReceiver) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(config.capacity),
                sender_closed: false,
                receiver_closed: false,
                published: 0,
                dropped: 0,
            }),
            config,
            notify: Notify::new(),
        });
        (
            ResultSender {
                shared: shared.clone(),
            },
            ResultReceiver { shared },
        )
    }
}

/// Producer half, owned by the frame pipeline.
///
/// Dropping it closes the channel.
#[derive(Debug)]
pub struct ResultSender {
    shared: Arc<Shared>,
}

impl ResultSender {
    /// Enqueue a list without waiting
    pub fn publish(&self, list: DetectionList) -> PublishOutcome {
        let outcome = {
            let mut inner = self.shared.inner.lock();
            if inner.sender_closed || inner.receiver_closed {
                return PublishOutcome::Closed;
            }
            inner.published += 1;

            if inner.queue.len() < self.shared.config.capacity {
                inner.queue.push_back(list);
                PublishOutcome::Queued
            } else {
                inner.dropped += 1;
                match self.shared.config.overflow {
                    OverflowPolicy::DropOldest => {
                        inner.queue.pop_front();
                        inner.queue.push_back(list);
                        PublishOutcome::EvictedOldest
                    }
                    OverflowPolicy::DropNewest => PublishOutcome::Discarded,
                }
            }
        };

        match outcome {
            PublishOutcome::Queued | PublishOutcome::EvictedOldest => {
                self.shared.notify.notify_one()
            }
            _ => trace!("Result channel full, discarded newest list"),
        }
        outcome
    }

    /// Close the channel; queued items stay readable
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        if !inner.sender_closed {
            inner.sender_closed = true;
            debug!(
                "Result channel closed after {} lists ({} dropped)",
                inner.published, inner.dropped
            );
            drop(inner);
            self.shared.notify.notify_one();
        }
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.sender_closed || inner.receiver_closed
    }

    /// Lists lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.shared.inner.lock().dropped
    }
}

impl Drop for ResultSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half, owned by the display loop
#[derive(Debug)]
pub struct ResultReceiver {
    shared: Arc<Shared>,
}

impl ResultReceiver {
    /// Wait for the next list; `None` once closed and drained.
    ///
    /// Cancel safe: a list is only removed from the queue when it is returned.
    pub async fn recv(&mut self) -> Option<DetectionList> {
        loop {
            match self.try_recv() {
                Ok(list) => return Some(list),
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => self.shared.notify.notified().await,
            }
        }
    }

    /// Wait at most `timeout` for the next list
    pub async fn recv_timeout(&mut self, timeout: Duration) -> RecvOutcome {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(list)) => RecvOutcome::Item(list),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::Timeout,
        }
    }

    /// Take the next list if one is queued
    pub fn try_recv(&mut self) -> Result<DetectionList, TryRecvError> {
        let mut inner = self.shared.inner.lock();
        match inner.queue.pop_front() {
            Some(list) => Ok(list),
            None if inner.sender_closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Number of queued lists
    pub fn len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lists lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.shared.inner.lock().dropped
    }
}

impl Drop for ResultReceiver {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.receiver_closed = true;
        inner.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(sequence: u64) -> DetectionList {
        DetectionList::new(sequence, sequence * 33, Vec::new())
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ResultChannelConfig {
            capacity: 0,
            overflow: OverflowPolicy::DropNewest,
        };
        assert!(ResultChannel::bounded(config).is_err());
    }

    #[test]
    fn test_latest_only_coalesces() {
        let (tx, mut rx) = ResultChannel::latest_only();
        assert_eq!(tx.publish(list(1)), PublishOutcome::Queued);
        assert_eq!(tx.publish(list(2)), PublishOutcome::EvictedOldest);
        assert_eq!(tx.publish(list(3)), PublishOutcome::EvictedOldest);

        assert_eq!(rx.try_recv().unwrap().sequence, 3);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx.dropped(), 2);
    }

    #[test]
    fn test_publish_after_receiver_dropped() {
        let (tx, rx) = ResultChannel::bounded(ResultChannelConfig::default()).unwrap();
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.publish(list(1)), PublishOutcome::Closed);
    }
}
