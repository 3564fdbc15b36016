//! Per-thread FIFO of pending messages.
//!
//! Each thread owns a pending list, a busy flag and a worker lock. The worker
//! lock is what guarantees a single drain per thread; the busy flag only
//! saves redundant spawns.
//!
//! Deletions set a tombstone instead of removing the entry, so a retraction
//! costs one scan and no compaction. Tombstoned entries are discarded when
//! they reach the head.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    dashmap::DashMap,
    parley_common::{ActorId, MessageId, ThreadId},
    tokio::time::Instant,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, queue as queue_metrics};

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message_id: MessageId,
    pub actor_id: ActorId,
    /// Text as it was when enqueued. The drain re-resolves the message before
    /// use.
    pub content: String,
    pub has_attachments: bool,
    /// Tombstone.
    pub deleted: bool,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_threads: usize,
    pub total_queued_messages: usize,
    pub processing_threads: usize,
}

#[derive(Default)]
struct ThreadQueue {
    pending: Mutex<VecDeque<QueuedMessage>>,
    busy: AtomicBool,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl ThreadQueue {
    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_len(&self) -> usize {
        self.pending().iter().filter(|m| !m.deleted).count()
    }
}

/// Pending messages for every thread. Threads are created lazily and kept for
/// the life of the process.
#[derive(Default)]
pub struct ThreadMessageQueue {
    threads: DashMap<ThreadId, Arc<ThreadQueue>>,
}

impl ThreadMessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn thread(&self, thread_id: &ThreadId) -> Arc<ThreadQueue> {
        if let Some(queue) = self.threads.get(thread_id) {
            return Arc::clone(queue.value());
        }
        Arc::clone(self.threads.entry(thread_id.clone()).or_default().value())
    }

    fn existing(&self, thread_id: &ThreadId) -> Option<Arc<ThreadQueue>> {
        self.threads.get(thread_id).map(|q| Arc::clone(q.value()))
    }

    /// Append a message and return how many live messages were ahead of it.
    pub fn enqueue(
        &self,
        thread_id: &ThreadId,
        message_id: MessageId,
        actor_id: ActorId,
        content: String,
        has_attachments: bool,
    ) -> usize {
        let queue = self.thread(thread_id);
        let mut pending = queue.pending();
        let position = pending.iter().filter(|m| !m.deleted).count();
        pending.push_back(QueuedMessage {
            message_id,
            actor_id,
            content,
            has_attachments,
            deleted: false,
            enqueued_at: Instant::now(),
        });
        drop(pending);

        #[cfg(feature = "metrics")]
        counter!(queue_metrics::ENQUEUED_TOTAL).increment(1);

        debug!(thread_id = %thread_id, position, "message enqueued");
        position
    }

    /// Tombstone a pending message. Returns whether a live entry matched.
    pub fn mark_deleted(&self, thread_id: &ThreadId, message_id: &MessageId) -> bool {
        let Some(queue) = self.existing(thread_id) else {
            return false;
        };
        let mut pending = queue.pending();
        let Some(entry) = pending
            .iter_mut()
            .find(|m| !m.deleted && &m.message_id == message_id)
        else {
            return false;
        };
        entry.deleted = true;
        drop(pending);

        #[cfg(feature = "metrics")]
        counter!(queue_metrics::RETRACTED_TOTAL).increment(1);

        debug!(thread_id = %thread_id, message_id = %message_id, "queued message retracted");
        true
    }

    /// Pop the next live message, discarding tombstones on the way.
    pub fn dequeue_next(&self, thread_id: &ThreadId) -> Option<QueuedMessage> {
        let queue = self.existing(thread_id)?;
        let mut pending = queue.pending();
        while let Some(message) = pending.pop_front() {
            if !message.deleted {
                return Some(message);
            }
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::SKIPPED_TOTAL).increment(1);
            debug!(thread_id = %thread_id, message_id = %message.message_id, "skipping retracted message");
        }
        None
    }

    /// Live (non-tombstoned) messages waiting.
    pub fn queue_length(&self, thread_id: &ThreadId) -> usize {
        self.existing(thread_id).map_or(0, |q| q.live_len())
    }

    pub fn is_busy(&self, thread_id: &ThreadId) -> bool {
        self.existing(thread_id)
            .is_some_and(|q| q.busy.load(Ordering::SeqCst))
    }

    pub fn set_busy(&self, thread_id: &ThreadId, busy: bool) {
        self.thread(thread_id).busy.store(busy, Ordering::SeqCst);
    }

    /// The thread's worker lock.
    pub fn lock_for(&self, thread_id: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.thread(thread_id).lock)
    }

    /// Drop every pending entry. Returns how many live messages were dropped.
    pub fn clear(&self, thread_id: &ThreadId) -> usize {
        let Some(queue) = self.existing(thread_id) else {
            return 0;
        };
        let mut pending = queue.pending();
        let live = pending.iter().filter(|m| !m.deleted).count();
        pending.clear();
        live
    }

    pub fn stats(&self) -> QueueStats {
        self.threads
            .iter()
            .fold(QueueStats::default(), |mut stats, entry| {
                let queue = entry.value();
                stats.total_threads += 1;
                stats.total_queued_messages += queue.live_len();
                if queue.busy.load(Ordering::SeqCst) {
                    stats.processing_threads += 1;
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(queue: &ThreadMessageQueue, thread: &ThreadId, id: u64) -> usize {
        queue.enqueue(
            thread,
            MessageId::from(id),
            ActorId::from("a"),
            format!("m{id}"),
            false,
        )
    }

    #[test]
    fn positions_count_live_messages_ahead() {
        let queue = ThreadMessageQueue::new();
        let t = ThreadId::from("t");
        assert_eq!(push(&queue, &t, 1), 0);
        assert_eq!(push(&queue, &t, 2), 1);
        assert!(queue.mark_deleted(&t, &MessageId::from(1_u64)));
        assert_eq!(push(&queue, &t, 3), 1);
    }

    #[test]
    fn tombstoned_message_is_skipped() {
        let queue = ThreadMessageQueue::new();
        let t = ThreadId::from("t");
        for id in 1..=3 {
            push(&queue, &t, id);
        }
        assert!(queue.mark_deleted(&t, &MessageId::from(2_u64)));
        assert_eq!(queue.queue_length(&t), 2);

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue_next(&t))
            .map(|m| m.content)
            .collect();
        assert_eq!(order, ["m1", "m3"]);
    }

    #[test]
    fn mark_deleted_misses() {
        let queue = ThreadMessageQueue::new();
        let t = ThreadId::from("t");
        assert!(!queue.mark_deleted(&t, &MessageId::from(1_u64)));
        push(&queue, &t, 1);
        assert!(queue.mark_deleted(&t, &MessageId::from(1_u64)));
        assert!(!queue.mark_deleted(&t, &MessageId::from(1_u64)));
        assert!(queue.dequeue_next(&t).is_none());
    }

    #[test]
    fn empty_queue_is_idempotent() {
        let queue = ThreadMessageQueue::new();
        let t = ThreadId::from("never-used");
        assert_eq!(queue.queue_length(&t), 0);
        assert!(queue.dequeue_next(&t).is_none());
        assert!(queue.dequeue_next(&t).is_none());
        assert!(!queue.is_busy(&t));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn busy_flag_and_stats() {
        let queue = ThreadMessageQueue::new();
        let a = ThreadId::from("a");
        let b = ThreadId::from("b");
        push(&queue, &a, 1);
        push(&queue, &a, 2);
        push(&queue, &b, 3);
        queue.set_busy(&a, true);
        assert!(queue.is_busy(&a));
        assert!(!queue.is_busy(&b));

        assert_eq!(queue.stats(), QueueStats {
            total_threads: 2,
            total_queued_messages: 3,
            processing_threads: 1,
        });

        assert_eq!(queue.clear(&a), 2);
        assert_eq!(queue.queue_length(&a), 0);
        queue.set_busy(&a, false);
        assert_eq!(queue.stats().processing_threads, 0);
    }

    #[tokio::test]
    async fn lock_is_shared_per_thread() {
        let queue = ThreadMessageQueue::new();
        let t = ThreadId::from("t");
        let first = queue.lock_for(&t);
        let second = queue.lock_for(&t);
        assert!(Arc::ptr_eq(&first, &second));

        let _held = first.lock().await;
        assert!(second.try_lock().is_err());
        assert!(queue.lock_for(&ThreadId::from("other")).try_lock().is_ok());
    }
}
