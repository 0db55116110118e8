//! Single-consumer input queue with head insertion and atomic drain.

use crate::lifecycle::gate::GatePermit;
use crate::message::{FlushRequest, TextChunk};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Work accepted by the engine.
#[derive(Debug)]
pub enum QueueItem {
    Text(TextChunk),
    /// Carries the permit that reopens the flush gate when dropped.
    Flush(FlushRequest, GatePermit),
}

#[derive(Debug, Default)]
pub struct InputQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_back(&self, item: QueueItem) {
        self.lock().push_back(item);
        self.notify.notify_one();
    }

    pub fn push_front(&self, item: QueueItem) {
        self.lock().push_front(item);
        self.notify.notify_one();
    }

    /// Inserts `items` at the head, keeping their relative order.
    pub fn push_front_many(&self, items: Vec<QueueItem>) {
        if items.is_empty() {
            return;
        }
        {
            let mut queue = self.lock();
            for item in items.into_iter().rev() {
                queue.push_front(item);
            }
        }
        self.notify.notify_one();
    }

    /// Waits for the next item. Only one task may call this.
    pub async fn pop(&self) -> QueueItem {
        loop {
            // Register interest before checking so a push between the check
            // and the await is not lost.
            let notified = self.notify.notified();
            if let Some(item) = self.lock().pop_front() {
                return item;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<QueueItem> {
        self.lock().pop_front()
    }

    /// Empties the queue in one step and returns what was removed.
    pub fn drain(&self) -> Vec<QueueItem> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
