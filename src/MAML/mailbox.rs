// src/MAML/mailbox.rs

use super::message::Message;
use crate::Core::futex::{futex_wait, futex_wake};
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Unbounded multi-producer buffer of messages with a single draining consumer.
///
/// Used twice by a context: as the outbox (application threads push, the
/// transport loop drains) and as the inbox (the transport loop pushes, the
/// dispatch loop drains). The lock is held only for a push or a swap.
pub struct Mailbox {
    items: Mutex<Vec<Message>>,
    /// Bumped whenever a push turns the buffer non-empty; consumers futex-wait on it.
    signal: AtomicU32,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            signal: AtomicU32::new(0),
        }
    }

    /// Appends a message, waking a waiting consumer if the buffer was empty.
    pub fn push(&self, message: Message) {
        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.push(message);
            was_empty
        };

        if was_empty {
            self.signal.fetch_add(1, Ordering::Release);
            futex_wake(&self.signal);
        }
    }

    /// Appends several messages under one lock acquisition.
    pub fn push_all(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.extend(messages);
            was_empty
        };

        if was_empty {
            self.signal.fetch_add(1, Ordering::Release);
            futex_wake(&self.signal);
        }
    }

    /// Takes the whole contents, leaving the buffer empty. Never blocks on
    /// an empty buffer.
    pub fn drain_all(&self) -> Vec<Message> {
        let mut items = self.items.lock();
        if items.is_empty() {
            return Vec::new();
        }
        mem::take(&mut *items)
    }

    /// Waits until a push makes the buffer non-empty, or `timeout` passes.
    pub fn wait_for_items(&self, timeout: Duration) {
        let seen = self.signal.load(Ordering::Acquire);
        if !self.is_empty() {
            return;
        }
        futex_wait(&self.signal, seen, timeout);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
