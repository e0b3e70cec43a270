//! Fixed-capacity cross-thread channels with explicit overflow policies.
//!
//! Every channel is a crossbeam array channel: its buffer is allocated once
//! when the channel is created. What happens when it is full is decided per
//! channel by [`OverflowPolicy`], and every drop or rejection is counted in
//! [`ChannelStats`].

use crossbeam::channel::{self, RecvTimeoutError, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::ChannelConfig;

/// Eviction attempts before a drop-oldest send gives up
const MAX_EVICTION_ATTEMPTS: usize = 8;

/// What a sender does when the channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued item to make room for the new one.
    /// Use for data where the latest value matters most.
    DropOldest,
    /// Wait up to `timeout_ms` for room, then reject
    BlockWithTimeout { timeout_ms: u64 },
    /// Refuse the new item immediately
    Reject,
}

/// Result of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Delivered after discarding `evicted` older items
    DeliveredAfterEviction { evicted: usize },
}

/// Send failure; the item is handed back to the caller
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError<T> {
    #[error("channel is full")]
    Full(T),

    #[error("channel receiver is gone")]
    Disconnected(T),
}

/// Lock-free counters shared by both ends of a channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub sent: u64,
    pub dropped: u64,
    pub rejected: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded channel named `name` with the given capacity and policy
pub fn bounded<T>(name: &'static str, config: ChannelConfig) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = channel::bounded(config.capacity.max(1));
    let stats = Arc::new(ChannelStats::default());
    let closed = Arc::new(AtomicBool::new(false));

    let sender = BoundedSender {
        name,
        policy: config.overflow,
        inner: tx,
        evictor: rx.clone(),
        stats: Arc::clone(&stats),
        closed: Arc::clone(&closed),
    };
    let receiver = BoundedReceiver {
        name,
        inner: rx,
        stats,
        closed,
    };
    (sender, receiver)
}

/// Producer side. Cloning yields another producer on the same channel.
#[derive(Debug)]
pub struct BoundedSender<T> {
    name: &'static str,
    policy: OverflowPolicy,
    inner: channel::Sender<T>,
    /// Receiver handle used only to discard the oldest item under `DropOldest`
    evictor: channel::Receiver<T>,
    stats: Arc<ChannelStats>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            policy: self.policy,
            inner: self.inner.clone(),
            evictor: self.evictor.clone(),
            stats: Arc::clone(&self.stats),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> BoundedSender<T> {
    /// Send according to the channel's overflow policy.
    ///
    /// Only `BlockWithTimeout` may wait; the other policies return at once.
    pub fn send(&self, item: T) -> Result<SendOutcome, ChannelError<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Disconnected(item));
        }

        match self.policy {
            OverflowPolicy::Reject => match self.inner.try_send(item) {
                Ok(()) => Ok(self.delivered(SendOutcome::Delivered)),
                Err(TrySendError::Full(item)) => Err(self.rejected(item)),
                Err(TrySendError::Disconnected(item)) => Err(ChannelError::Disconnected(item)),
            },
            OverflowPolicy::BlockWithTimeout { timeout_ms } => {
                match self
                    .inner
                    .send_timeout(item, Duration::from_millis(timeout_ms))
                {
                    Ok(()) => Ok(self.delivered(SendOutcome::Delivered)),
                    Err(channel::SendTimeoutError::Timeout(item)) => Err(self.rejected(item)),
                    Err(channel::SendTimeoutError::Disconnected(item)) => {
                        Err(ChannelError::Disconnected(item))
                    }
                }
            }
            OverflowPolicy::DropOldest => self.send_dropping_oldest(item, |_| {}),
        }
    }

    /// Like [`send`](Self::send), but items evicted under `DropOldest` are
    /// handed to `reclaim` instead of being discarded. Other policies never
    /// evict and behave exactly as `send`.
    pub fn send_reclaiming<F>(&self, item: T, reclaim: F) -> Result<SendOutcome, ChannelError<T>>
    where
        F: FnMut(T),
    {
        match self.policy {
            OverflowPolicy::DropOldest if !self.closed.load(Ordering::Acquire) => {
                self.send_dropping_oldest(item, reclaim)
            }
            _ => self.send(item),
        }
    }

    fn send_dropping_oldest<F>(&self, mut item: T, mut reclaim: F) -> Result<SendOutcome, ChannelError<T>>
    where
        F: FnMut(T),
    {
        let mut evicted = 0;
        for _ in 0..MAX_EVICTION_ATTEMPTS {
            match self.inner.try_send(item) {
                Ok(()) => {
                    let outcome = if evicted == 0 {
                        SendOutcome::Delivered
                    } else {
                        SendOutcome::DeliveredAfterEviction { evicted }
                    };
                    return Ok(self.delivered(outcome));
                }
                Err(TrySendError::Full(returned)) => {
                    item = returned;
                    if let Ok(oldest) = self.evictor.try_recv() {
                        evicted += 1;
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        reclaim(oldest);
                    }
                }
                Err(TrySendError::Disconnected(returned)) => {
                    return Err(ChannelError::Disconnected(returned))
                }
            }
        }
        // Other producers refilled the slot every time
        Err(self.rejected(item))
    }

    /// Wait up to `timeout` for room whatever the overflow policy. For
    /// shutdown paths, where the sender is allowed to block.
    pub fn send_waiting(&self, item: T, timeout: Duration) -> Result<SendOutcome, ChannelError<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Disconnected(item));
        }
        match self.inner.send_timeout(item, timeout) {
            Ok(()) => Ok(self.delivered(SendOutcome::Delivered)),
            Err(channel::SendTimeoutError::Timeout(item)) => Err(self.rejected(item)),
            Err(channel::SendTimeoutError::Disconnected(item)) => Err(ChannelError::Disconnected(item)),
        }
    }

    #[inline]
    fn delivered(&self, outcome: SendOutcome) -> SendOutcome {
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    fn rejected(&self, item: T) -> ChannelError<T> {
        let rejected = self.stats.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        // First rejection and every 1000th after it
        if rejected % 1_000 == 1 {
            warn!(
                channel = self.name,
                rejected,
                capacity = self.capacity(),
                "Channel full, item rejected"
            );
        }
        ChannelError::Full(item)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().unwrap_or(0)
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer side; one per channel
#[derive(Debug)]
pub struct BoundedReceiver<T> {
    name: &'static str,
    inner: channel::Receiver<T>,
    stats: Arc<ChannelStats>,
    closed: Arc<AtomicBool>,
}

impl<T> BoundedReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    /// Wait up to `timeout` for an item. Reports `Disconnected` once every
    /// sender is gone and the buffer is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.inner.recv_timeout(timeout)
    }

    /// Move up to `max` queued items into `out`, returning how many moved
    pub fn drain_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.inner.try_recv() {
                Ok(item) => {
                    out.push(item);
                    moved += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        moved
    }

    /// Iterate over items currently queued without waiting
    pub fn try_iter(&self) -> impl Iterator<Item = T> + '_ {
        self.inner.try_iter()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().unwrap_or(0)
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

impl<T> Drop for BoundedReceiver<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize, overflow: OverflowPolicy) -> ChannelConfig {
        ChannelConfig::new(capacity, overflow)
    }

    #[test]
    fn test_reject_policy_returns_item() {
        let (tx, rx) = bounded::<u32>("test", config(2, OverflowPolicy::Reject));
        assert_eq!(tx.send(1), Ok(SendOutcome::Delivered));
        assert_eq!(tx.send(2), Ok(SendOutcome::Delivered));
        assert_eq!(tx.send(3), Err(ChannelError::Full(3)));
        assert_eq!(rx.stats().snapshot().rejected, 1);
        assert_eq!(rx.try_recv(), Some(1));
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (tx, rx) = bounded::<u32>("test", config(3, OverflowPolicy::DropOldest));
        for value in 0..10 {
            assert!(tx.send(value).is_ok());
        }
        let mut out = Vec::new();
        assert_eq!(rx.drain_into(&mut out, 10), 3);
        assert_eq!(out, vec![7, 8, 9]);

        let stats = rx.stats().snapshot();
        assert_eq!(stats.sent, 10);
        assert_eq!(stats.dropped, 7);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn test_reclaiming_send_returns_evicted_items() {
        let (tx, rx) = bounded::<u32>("test", config(2, OverflowPolicy::DropOldest));
        let mut reclaimed = Vec::new();
        for value in 0..5 {
            assert!(tx.send_reclaiming(value, |oldest| reclaimed.push(oldest)).is_ok());
        }
        assert_eq!(reclaimed, vec![0, 1, 2]);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(rx.stats().dropped(), 3);

        let (tx, _rx) = bounded::<u32>("test", config(1, OverflowPolicy::Reject));
        tx.send(1).unwrap();
        let mut reclaimed = Vec::new();
        assert_eq!(
            tx.send_reclaiming(2, |oldest| reclaimed.push(oldest)),
            Err(ChannelError::Full(2))
        );
        assert!(reclaimed.is_empty());
    }

    #[test]
    fn test_waiting_send_does_not_evict() {
        let (tx, rx) = bounded::<u32>("test", config(1, OverflowPolicy::DropOldest));
        tx.send(1).unwrap();
        assert_eq!(
            tx.send_waiting(2, Duration::from_millis(5)),
            Err(ChannelError::Full(2))
        );
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(tx.send_waiting(3, Duration::from_millis(5)), Ok(SendOutcome::Delivered));
        assert_eq!(rx.stats().dropped(), 0);
    }

    #[test]
    fn test_drop_oldest_reports_eviction() {
        let (tx, _rx) = bounded::<u32>("test", config(1, OverflowPolicy::DropOldest));
        assert_eq!(tx.send(1), Ok(SendOutcome::Delivered));
        assert_eq!(
            tx.send(2),
            Ok(SendOutcome::DeliveredAfterEviction { evicted: 1 })
        );
    }

    #[test]
    fn test_block_with_timeout_rejects_after_wait() {
        let (tx, rx) = bounded::<u32>(
            "test",
            config(1, OverflowPolicy::BlockWithTimeout { timeout_ms: 5 }),
        );
        tx.send(1).unwrap();
        let started = std::time::Instant::now();
        assert_eq!(tx.send(2), Err(ChannelError::Full(2)));
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = bounded::<u32>("test", config(4, OverflowPolicy::DropOldest));
        drop(rx);
        assert_eq!(tx.send(1), Err(ChannelError::Disconnected(1)));
        assert!(tx.is_closed());
    }

    #[test]
    fn test_recv_timeout_on_empty_channel() {
        let (_tx, rx) = bounded::<u32>("test", config(4, OverflowPolicy::Reject));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(1)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn test_policy_serde_shape() {
        let json = serde_json::to_value(OverflowPolicy::BlockWithTimeout { timeout_ms: 10 }).unwrap();
        assert_eq!(json["policy"], "block_with_timeout");
        assert_eq!(json["timeout_ms"], 10);

        let parsed: OverflowPolicy = serde_json::from_str(r#"{"policy":"drop_oldest"}"#).unwrap();
        assert_eq!(parsed, OverflowPolicy::DropOldest);
    }
}
