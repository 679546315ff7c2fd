// State shared between a context, its two loops and the application threads.

use super::collective::Collective;
use super::config::Config;
use super::error::Error;
use super::handler::MessageHandler;
use super::mailbox::Mailbox;
use super::stats::MessageStats;
use crate::Transport::{Channel, Transport};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Shared {
    pub transport: Arc<dyn Transport>,
    pub config: Config,
    pub outbox: Mailbox,
    pub inbox: Mailbox,
    pub handlers: RwLock<HashMap<Channel, Arc<dyn MessageHandler>>>,
    /// Collectives queued by the application, not yet started.
    pub collectives: Mutex<Vec<Box<dyn Collective>>>,
    pub stats: MessageStats,
    /// Outbox empty and nothing in flight, as last observed by the transport loop.
    flushed: Mutex<bool>,
    flush_changed: Condvar,
    fatal: Mutex<Option<String>>,
}

impl Shared {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            outbox: Mailbox::new(),
            inbox: Mailbox::new(),
            handlers: RwLock::new(HashMap::new()),
            collectives: Mutex::new(Vec::new()),
            stats: MessageStats::new(),
            flushed: Mutex::new(true),
            flush_changed: Condvar::new(),
            fatal: Mutex::new(None),
        }
    }

    pub fn handler_for(&self, channel: Channel) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(&channel).cloned()
    }

    pub fn has_handler(&self, channel: Channel) -> bool {
        self.handlers.read().contains_key(&channel)
    }

    pub fn registered_channels(&self) -> Vec<Channel> {
        self.handlers.read().keys().copied().collect()
    }

    pub fn queued_collectives(&self) -> usize {
        self.collectives.lock().len()
    }

    pub fn stats(&self) -> Option<&MessageStats> {
        self.config.detailed_logging.then_some(&self.stats)
    }

    pub fn mark_unflushed(&self) {
        *self.flushed.lock() = false;
    }

    /// Publishes the flushed state. `in_flight` is whether either pending
    /// table or the running collectives still hold entries; the queues are
    /// checked under the lock so a concurrent send cannot be overwritten.
    pub fn publish_flushed(&self, in_flight: bool) {
        let mut flushed = self.flushed.lock();
        let now = !in_flight && self.outbox.is_empty() && self.queued_collectives() == 0;
        if now != *flushed {
            *flushed = now;
            if now {
                self.flush_changed.notify_all();
            }
        }
    }

    /// Blocks until flushed, a fatal error is recorded, or `timeout` passes.
    /// Returns whether the flushed state was reached.
    pub fn wait_flushed(&self, timeout: Duration) -> bool {
        let mut flushed = self.flushed.lock();
        if !*flushed && self.fatal.lock().is_none() {
            self.flush_changed.wait_for(&mut flushed, timeout);
        }
        *flushed
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    pub fn check_fatal(&self) -> Result<(), Error> {
        match self.fatal_error() {
            Some(reason) => Err(Error::Fatal(reason)),
            None => Ok(()),
        }
    }

    /// Records the first fatal error; later ones are only logged.
    pub fn record_fatal(&self, origin: &'static str, err: &Error) {
        tracing::error!(origin, error = %err, "fatal error in message layer");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(format!("{origin}: {err}"));
            }
        }
        let _flushed = self.flushed.lock();
        self.flush_changed.notify_all();
    }

    /// Fatal error raised inside a background loop: no caller to return it
    /// to, so record it and, unless configured otherwise, abort.
    pub fn raise_fatal(&self, origin: &'static str, err: &Error) {
        self.record_fatal(origin, err);
        if self.config.abort_on_fatal {
            std::process::abort();
        }
    }
}
