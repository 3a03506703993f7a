//! Queue bridge: the thread-safe hand-off between a receiver and a transmitter.
//!
//! Items keep their admission order. Each item carries an `available_at`
//! instant; `dequeue` returns the oldest item that is already available, so
//! an item with a long retrieval delay never holds back later items with a
//! shorter one. Every mutation happens under a single mutex, and a condvar
//! wakes waiters on admission and removal.

use crate::config::QueueSettings;
use crate::error::{FlowError, Result};
use crate::flow::capability::Collaborator;
use crate::flow::stop::{StopToken, DEFAULT_STOP_TICK};
use crate::flow::token::Token;
use crate::rats::guard::{EnqueueGuard, PassThrough};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    token: Token,
    available_at: Instant,
}

#[derive(Debug)]
pub struct QueueBridge {
    name: String,
    /// Hard bound, independent of the guard. `None` means unbounded.
    capacity: Option<usize>,
    guard: Box<dyn EnqueueGuard>,
    items: Mutex<VecDeque<Entry>>,
    changed: Condvar,
}

impl QueueBridge {
    /// An unbounded queue with a pass-through guard.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            guard: Box::new(PassThrough),
            items: Mutex::new(VecDeque::new()),
            changed: Condvar::new(),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &QueueSettings) -> Self {
        let mut queue = Self::new(name).with_guard(settings.guard.build());
        queue.capacity = settings.capacity.filter(|&c| c > 0);
        queue
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub fn with_guard(mut self, guard: Box<dyn EnqueueGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn guard(&self) -> &dyn EnqueueGuard {
        self.guard.as_ref()
    }

    /// Admission bound: the lower of `limit` and the hard capacity.
    fn bound(&self, limit: Option<usize>) -> Option<usize> {
        match (limit, self.capacity) {
            (Some(l), Some(c)) => Some(l.min(c)),
            (l, c) => l.or(c),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `token` through the configured guard. It becomes retrievable
    /// after `delay`. A guard wait observing `stop` returns `FlowError::Stopped`.
    pub fn enqueue(&self, token: Token, delay: Duration, stop: &StopToken) -> Result<()> {
        self.guard.enqueue(self, token, delay, stop)
    }

    /// Admit `token` unless the queue already holds `limit` items (or its
    /// hard capacity). Checking and pushing happen under one lock.
    pub fn try_admit(
        &self,
        token: Token,
        delay: Duration,
        limit: Option<usize>,
    ) -> std::result::Result<(), Token> {
        let bound = self.bound(limit);
        let mut items = self.lock();
        if bound.is_some_and(|b| items.len() >= b) {
            return Err(token);
        }
        items.push_back(Entry {
            token,
            available_at: Instant::now() + delay,
        });
        drop(items);
        self.changed.notify_all();
        Ok(())
    }

    /// Admit `token` bypassing the guard. Fails only at hard capacity.
    pub fn push(&self, token: Token, delay: Duration) -> Result<()> {
        self.try_admit(token, delay, None).map_err(|_| FlowError::QueueFull {
            queue: self.name.clone(),
            capacity: self.capacity.unwrap_or_default(),
        })
    }

    /// Oldest item whose retrieval delay has passed. Never blocks.
    pub fn dequeue(&self) -> Option<Token> {
        let now = Instant::now();
        let mut items = self.lock();
        let index = items.iter().position(|e| e.available_at <= now)?;
        let entry = items.remove(index)?;
        drop(items);
        self.changed.notify_all();
        Some(entry.token)
    }

    /// Wait up to `timeout` for an available item, observing `stop` at
    /// least once per stop tick.
    pub fn dequeue_timeout(&self, timeout: Duration, stop: &StopToken) -> Option<Token> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            let now = Instant::now();
            if let Some(index) = items.iter().position(|e| e.available_at <= now) {
                let entry = items.remove(index)?;
                drop(items);
                self.changed.notify_all();
                return Some(entry.token);
            }
            if stop.is_stopped() || now >= deadline {
                return None;
            }
            // Sleep until the next item matures, the deadline, or one tick
            let mut wait = (deadline - now).min(DEFAULT_STOP_TICK);
            if let Some(next) = items.iter().map(|e| e.available_at).min() {
                wait = wait.min(next.saturating_duration_since(now));
            }
            let (guard, _) = self
                .changed
                .wait_timeout(items, wait.max(Duration::from_millis(1)))
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
        }
    }

    /// Block for at most `timeout` while the queue holds `limit` or more
    /// items, or is at its hard capacity, whichever is lower.
    pub fn wait_for_space(&self, limit: usize, timeout: Duration) {
        let limit = self.bound(Some(limit)).unwrap_or(limit);
        let items = self.lock();
        if items.len() < limit {
            return;
        }
        let _ = self
            .changed
            .wait_timeout_while(items, timeout, |items| items.len() >= limit)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wake every thread waiting on this queue, e.g. after a stop.
    pub fn wake_all(&self) {
        self.changed.notify_all();
    }

    /// Exact number of admitted, not yet removed items.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every item regardless of delay, in admission order.
    pub fn drain(&self) -> Vec<Token> {
        let drained: Vec<Token> = self.lock().drain(..).map(|e| e.token).collect();
        self.changed.notify_all();
        drained
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.changed.notify_all();
    }
}

/// Named queues shared between actors and pipelines of one flow.
///
/// Published by the queue set-up actor; enqueue actors and dequeue
/// receivers resolve queues from it by name.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: Mutex<HashMap<String, Arc<QueueBridge>>>,
}

impl Collaborator for QueueRegistry {}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing queue `name`, or a new one built from `settings`.
    pub fn get_or_create(&self, name: &str, settings: &QueueSettings) -> Arc<QueueBridge> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(QueueBridge::from_settings(name, settings))),
        )
    }

    pub fn insert(&self, queue: Arc<QueueBridge>) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.name().to_string(), queue);
    }

    pub fn get(&self, name: &str) -> Option<Arc<QueueBridge>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<QueueBridge>> {
        self.get(name)
            .ok_or_else(|| FlowError::Config(format!("Unknown queue '{}'", name)))
    }

    /// Forget every queue. Holders of a queue keep their handle.
    pub fn clear(&self) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::token::Payload;
    use proptest::prelude::*;

    fn int(token: Option<Token>) -> Option<i64> {
        token.and_then(|t| t.payload().as_int())
    }

    #[test]
    fn test_fifo_order() {
        let queue = QueueBridge::new("q");
        queue.push(Token::new(1), Duration::ZERO).unwrap();
        queue.push(Token::new(2), Duration::ZERO).unwrap();
        assert_eq!(queue.size(), 2);
        assert_eq!(int(queue.dequeue()), Some(1));
        assert_eq!(int(queue.dequeue()), Some(2));
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_delayed_item_not_returned_early() {
        let queue = QueueBridge::new("q");
        queue.push(Token::new(1), Duration::from_millis(60)).unwrap();
        queue.push(Token::new(2), Duration::ZERO).unwrap();

        // The undelayed item overtakes the delayed one
        assert_eq!(int(queue.dequeue()), Some(2));
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.size(), 1);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(int(queue.dequeue()), Some(1));
    }

    #[test]
    fn test_hard_capacity() {
        let queue = QueueBridge::new("q").with_capacity(1);
        queue.push(Token::new(1), Duration::ZERO).unwrap();
        let err = queue.push(Token::new(2), Duration::ZERO).unwrap_err();
        assert!(matches!(err, FlowError::QueueFull { capacity: 1, .. }));
    }

    #[test]
    fn test_dequeue_timeout_waits_for_delay() {
        let queue = QueueBridge::new("q");
        queue.push(Token::new(7), Duration::from_millis(30)).unwrap();
        let stop = StopToken::new();
        let start = Instant::now();
        assert_eq!(int(queue.dequeue_timeout(Duration::from_secs(2), &stop)), Some(7));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_dequeue_timeout_observes_stop() {
        let queue = QueueBridge::new("q");
        let stop = StopToken::new();
        stop.stop();
        assert!(queue.dequeue_timeout(Duration::from_secs(5), &stop).is_none());
    }

    #[test]
    fn test_drain_ignores_delay() {
        let queue = QueueBridge::new("q");
        queue.push(Token::new(1), Duration::from_secs(60)).unwrap();
        queue.push(Token::new("x"), Duration::ZERO).unwrap();
        let drained: Vec<Payload> = queue.drain().iter().map(|t| t.payload().clone()).collect();
        assert_eq!(drained, vec![Payload::Int(1), Payload::from("x")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_registry_shares_queues() {
        let registry = QueueRegistry::new();
        let a = registry.get_or_create("work", &QueueSettings::default());
        let b = registry.get_or_create("work", &QueueSettings::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.require("missing").is_err());
        assert_eq!(registry.names(), vec!["work".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_equal_delay_items_leave_in_admission_order(values in proptest::collection::vec(any::<i64>(), 0..64)) {
            let queue = QueueBridge::new("q");
            for v in &values {
                queue.push(Token::new(*v), Duration::ZERO).unwrap();
            }
            prop_assert_eq!(queue.size(), values.len());
            let mut out = Vec::new();
            while let Some(token) = queue.dequeue() {
                out.push(token.payload().as_int().unwrap());
            }
            prop_assert_eq!(out, values);
            prop_assert_eq!(queue.size(), 0);
        }
    }
}
