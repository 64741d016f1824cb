//! Agent mailbox implementation
//!
//! Bounded FIFO with an explicit overflow policy. Many producers, one
//! consumer (the agent's message pump).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use agora_core::config::{MailboxConfig, OverflowPolicy};
use agora_core::constants::MAILBOX_CAPACITY_MAX;
use agora_core::error::Error;
use agora_core::{AgentId, Envelope};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a successful push
#[derive(Debug)]
pub enum PushOutcome {
    /// The message was queued
    Accepted,
    /// The message was queued after evicting the oldest one
    EvictedOldest(Envelope),
}

/// Push failure, returning the message to the sender
#[derive(Debug)]
pub enum PushError {
    /// The mailbox is at capacity and the policy refused the message
    Full {
        envelope: Envelope,
        depth: usize,
        capacity: usize,
    },
    /// The mailbox no longer accepts messages
    Closed(Envelope),
}

impl PushError {
    /// Recover the rejected message
    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::Full { envelope, .. } => envelope,
            Self::Closed(envelope) => envelope,
        }
    }

    /// Convert into the crate error for `agent_id`
    pub fn into_error(self, agent_id: &AgentId) -> Error {
        self.into_parts(agent_id).1
    }

    /// Split into the refused message and the crate error for `agent_id`
    pub fn into_parts(self, agent_id: &AgentId) -> (Envelope, Error) {
        match self {
            Self::Full {
                envelope,
                depth,
                capacity,
            } => (
                envelope,
                Error::MailboxFull {
                    agent_id: agent_id.to_string(),
                    depth,
                    capacity,
                },
            ),
            Self::Closed(envelope) => (
                envelope,
                Error::MailboxClosed {
                    agent_id: agent_id.to_string(),
                },
            ),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub depth: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub evicted: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Queue {
    items: VecDeque<Envelope>,
    closed: bool,
}

/// Bounded mailbox for agent messages
///
/// - Explicit capacity limit
/// - FIFO ordering per producer
/// - No silent drops: a refused message is handed back, an evicted one is
///   returned to the caller and counted
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<Queue>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Signals the consumer that an item (or close) is available
    item_ready: Notify,
    /// Signals blocked producers that space (or close) is available
    space_ready: Notify,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl Mailbox {
    /// Create a mailbox from configuration
    pub fn new(config: &MailboxConfig) -> Self {
        Self::with_capacity(config.capacity, config.overflow_policy)
    }

    /// Create a mailbox with explicit capacity and policy
    pub fn with_capacity(capacity: usize, policy: OverflowPolicy) -> Self {
        debug_assert!(capacity > 0, "capacity must be positive");
        debug_assert!(
            capacity <= MAILBOX_CAPACITY_MAX,
            "capacity exceeds MAILBOX_CAPACITY_MAX"
        );

        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            policy,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Try to enqueue without waiting
    ///
    /// Under `Block` a full mailbox refuses the message like `Reject`;
    /// use `push` to wait for space.
    pub fn try_push(&self, envelope: Envelope) -> Result<PushOutcome, PushError> {
        let result = self.offer(envelope);
        if matches!(result, Err(PushError::Full { .. })) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Enqueue, waiting for space when the policy is `Block`
    pub async fn push(&self, envelope: Envelope) -> Result<PushOutcome, PushError> {
        if self.policy != OverflowPolicy::Block {
            return self.try_push(envelope);
        }

        let mut envelope = envelope;
        loop {
            let notified = self.space_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.offer(envelope) {
                Err(PushError::Full { envelope: e, .. }) => {
                    envelope = e;
                    notified.await;
                }
                other => return other,
            }
        }
    }

    fn offer(&self, envelope: Envelope) -> Result<PushOutcome, PushError> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(PushError::Closed(envelope));
        }

        let outcome = if queue.items.len() < self.capacity {
            queue.items.push_back(envelope);
            PushOutcome::Accepted
        } else if self.policy == OverflowPolicy::DropOldest {
            let oldest = queue.items.pop_front();
            queue.items.push_back(envelope);
            match oldest {
                Some(old) => {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::EvictedOldest(old)
                }
                None => PushOutcome::Accepted,
            }
        } else {
            return Err(PushError::Full {
                envelope,
                depth: queue.items.len(),
                capacity: self.capacity,
            });
        };

        debug_assert!(queue.items.len() <= self.capacity);
        drop(queue);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.item_ready.notify_one();
        Ok(outcome)
    }

    /// Receive the next message
    ///
    /// Returns `None` only once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.queue.lock();
                if let Some(envelope) = queue.items.pop_front() {
                    drop(queue);
                    self.dequeued.fetch_add(1, Ordering::Relaxed);
                    self.space_ready.notify_waiters();
                    return Some(envelope);
                }
                if queue.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting messages; queued messages stay receivable
    pub fn close(&self) {
        self.queue.lock().closed = true;
        self.item_ready.notify_waiters();
        self.item_ready.notify_one();
        self.space_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Snapshot of depth and counters
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            depth: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
