//! Work queue: many timer producers, one dispatch consumer. FIFO, unbounded,
//! with a visible depth so a stalled consumer can be detected.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use byne_core::WorkItem;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    ready: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: WorkItem) {
        self.items().push_back(item);
        self.ready.notify_one();
    }

    /// Wait for the next item. Only the dispatch loop calls this.
    pub async fn pop(&self) -> WorkItem {
        loop {
            if let Some(item) = self.items().pop_front() {
                return item;
            }
            self.ready.notified().await;
        }
    }

    #[cfg(test)]
    pub fn try_pop(&self) -> Option<WorkItem> {
        self.items().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Discard everything pending; returns how many items were dropped.
    pub fn drain(&self) -> usize {
        let mut items = self.items();
        let n = items.len();
        items.clear();
        n
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        // Items are plain values; a panicked holder cannot leave them half-written.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order_and_drain() {
        let q = WorkQueue::new();
        q.push(WorkItem::SendValue);
        q.push(WorkItem::RefreshIncrement);
        q.push(WorkItem::SendValue);
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_pop(), Some(WorkItem::SendValue));
        assert_eq!(q.try_pop(), Some(WorkItem::RefreshIncrement));
        assert_eq!(q.drain(), 1);
        assert_eq!(q.len(), 0);
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = Arc::new(WorkQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        q.push(WorkItem::RefreshIncrement);
        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, WorkItem::RefreshIncrement);
    }

    #[tokio::test]
    async fn push_before_pop_is_not_lost() {
        let q = WorkQueue::new();
        q.push(WorkItem::SendValue);
        q.push(WorkItem::SendValue);
        assert_eq!(q.pop().await, WorkItem::SendValue);
        assert_eq!(q.pop().await, WorkItem::SendValue);
        assert_eq!(q.len(), 0);
    }
}
