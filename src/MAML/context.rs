// src/MAML/context.rs

use super::collective::Collective;
use super::compression;
use super::config::Config;
use super::dispatch_loop::DispatchLoop;
use super::error::{Error, Result};
use super::handler::MessageHandler;
use super::message::Message;
use super::shared::Shared;
use super::stats::StatsSummary;
use super::transport_loop::TransportLoop;
use crate::Core::async_loop::{AsyncLoop, LaunchMode};
use crate::Transport::{Channel, Peer, Transport, TransportError};
use crossbeam_utils::Backoff;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
/// Loops being disarmed; only the transport side may be driven inline.
const STOPPING: u8 = 2;

/// Sizes of the queues and in-flight tables of a context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub outbox: usize,
    pub inbox: usize,
    pub sends: usize,
    pub recvs: usize,
    /// Collectives queued or still running.
    pub collectives: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct Tasks {
    send_receive: Option<AsyncLoop>,
    process_inbox: Option<AsyncLoop>,
}

/// Owner of the message layer on one transport endpoint.
///
/// A context starts out stopped. Messages can be queued with [`send`] in any
/// state; they go out once the context is started, or during the flush that
/// [`stop`] performs.
///
/// [`send`]: Context::send
/// [`stop`]: Context::stop
pub struct Context {
    shared: Arc<Shared>,
    transport_loop: Arc<Mutex<TransportLoop>>,
    dispatch: Arc<DispatchLoop>,
    tasks: Mutex<Tasks>,
    state: AtomicU8,
    /// Held while the queues are drained on a caller's thread. Starting the
    /// loops takes it too, so the inbox never has two consumers. The flag is
    /// set while that thread runs handlers.
    flush_phase: ReentrantMutex<Cell<bool>>,
}

impl Context {
    /// Brings the layer up on `transport`, which the host must already have
    /// initialised. An endpoint backs at most one live context.
    pub fn init(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        if !transport.is_ready() {
            return Err(Error::TransportNotReady);
        }
        if !transport.attach() {
            return Err(Error::AlreadyInitialized);
        }

        tracing::debug!(
            launch_mode = ?config.launch_mode,
            compress = config.compress_messages,
            detailed_logging = config.detailed_logging,
            "message layer initialised"
        );

        let shared = Arc::new(Shared::new(transport, config));
        Ok(Self {
            transport_loop: Arc::new(Mutex::new(TransportLoop::new(Arc::clone(&shared)))),
            dispatch: Arc::new(DispatchLoop::new(Arc::clone(&shared))),
            shared,
            tasks: Mutex::new(Tasks {
                send_receive: None,
                process_inbox: None,
            }),
            state: AtomicU8::new(STOPPED),
            flush_phase: ReentrantMutex::new(Cell::new(false)),
        })
    }

    /// Installs `handler` for every message arriving on `channel`. A second
    /// registration on the same channel replaces the first.
    pub fn register_handler_for(&self, channel: Channel, handler: Arc<dyn MessageHandler>) {
        let previous = self.shared.handlers.write().insert(channel, handler);
        if previous.is_some() {
            tracing::warn!(%channel, "handler for this channel already installed, replacing it");
        }
    }

    /// Queues an addressed message. Works whether or not the context is
    /// running; ownership passes to the layer.
    pub fn send(&self, mut message: Message) -> Result<()> {
        self.shared.check_fatal()?;
        let (channel, peer) = message.address().ok_or(Error::Unaddressed {
            channel: message.channel(),
            peer: message.peer(),
        })?;
        let peers = self.shared.transport.peer_count(channel)?;
        if peer.0 as usize >= peers {
            return Err(TransportError::PeerOutOfRange { peer, peers }.into());
        }

        if self.shared.config.compress_messages {
            compression::compress(&mut message, self.shared.stats())?;
        }
        if let Some(max) = self.shared.transport.max_message_size() {
            if message.size() > max {
                return Err(Error::MessageTooLarge {
                    size: message.size(),
                    max,
                });
            }
        }

        self.shared.outbox.push(message);
        self.shared.mark_unflushed();
        Ok(())
    }

    /// Addresses `message` to `peer` on `channel` (tag 0) and queues it.
    pub fn send_to(&self, channel: Channel, peer: Peer, mut message: Message) -> Result<()> {
        message.address_to(channel, peer);
        message.set_tag(0);
        self.send(message)
    }

    /// Queues a collective operation. The transport loop starts it on its
    /// next pass and polls it until it finishes; flushes wait for it.
    pub fn queue_collective(&self, collective: impl Collective + 'static) -> Result<()> {
        self.shared.check_fatal()?;
        self.shared.collectives.lock().push(Box::new(collective));
        self.shared.mark_unflushed();
        Ok(())
    }

    /// Starts both background loops. No-op when already running.
    pub fn start(&self) -> Result<()> {
        self.shared.check_fatal()?;
        let mut tasks = self.tasks.lock();
        if self.is_running() {
            return Ok(());
        }
        // waits out a flush phase on another thread
        let phase = self.flush_phase.lock();
        if phase.get() {
            return Err(Error::StartInsideFlush);
        }

        let mode = self.shared.config.launch_mode.resolve();
        if tasks.send_receive.is_none() {
            tasks.send_receive = Some(self.spawn_transport_loop(mode)?);
        }
        if tasks.process_inbox.is_none() {
            tasks.process_inbox = Some(self.spawn_dispatch_loop(mode)?);
        }

        if let Some(task) = &tasks.send_receive {
            task.start();
        }
        if let Some(task) = &tasks.process_inbox {
            task.start();
        }
        self.state.store(RUNNING, Ordering::Release);
        drop(phase);

        tracing::debug!(?mode, "message layer started");
        Ok(())
    }

    /// Stops both loops and flushes: everything queued or in flight at this
    /// point is sent, and everything already probed is delivered. Payloads
    /// peers have not yet started to send are not waited for.
    pub fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let tasks = self.tasks.lock();
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        if let Some(task) = &tasks.send_receive {
            task.stop();
        }
        if let Some(task) = &tasks.process_inbox {
            task.stop();
        }
        let phase = self.flush_phase.lock();
        self.state.store(STOPPED, Ordering::Release);
        drop(tasks);
        tracing::debug!("message layer stopped, flushing");

        self.shared.check_fatal()?;
        self.flush_remaining(&phase)
    }

    /// Blocks until every queued outgoing message and collective has been
    /// handed off and nothing is in flight. When stopped, performs the flush
    /// itself.
    pub fn flush(&self) -> Result<()> {
        let poll = self.shared.config.idle_wait * 10;
        loop {
            self.shared.check_fatal()?;
            match self.state.load(Ordering::Acquire) {
                RUNNING => {
                    if self.shared.wait_flushed(poll) {
                        return Ok(());
                    }
                }
                STOPPED => {
                    let phase = self.flush_phase.lock();
                    // start() needs the phase lock, so this holds until we return
                    if self.state.load(Ordering::Acquire) == STOPPED {
                        return self.flush_remaining(&phase);
                    }
                }
                _ => {
                    // the dispatch loop may still be running a handler, possibly
                    // this very caller; drive only the outgoing side
                    return self.flush_outgoing();
                }
            }
        }
    }

    /// Stops the layer and releases the transport endpoint.
    pub fn finalize(self) -> Result<()> {
        self.stop()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Reason for the fatal error that killed a background loop, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.shared.fatal_error()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        let transport_loop = self.transport_loop.lock();
        PendingCounts {
            outbox: self.shared.outbox.len(),
            inbox: self.shared.inbox.len(),
            sends: transport_loop.pending_sends(),
            recvs: transport_loop.pending_recvs(),
            collectives: transport_loop.pending_collectives() + self.shared.queued_collectives(),
        }
    }

    /// Statistics collected so far (empty unless detailed logging is on).
    pub fn stats(&self) -> StatsSummary {
        self.shared.stats.summary()
    }

    /// Logs the collected statistics and clears them.
    pub fn log_message_timings(&self) -> StatsSummary {
        if !self.shared.config.detailed_logging {
            return StatsSummary::default();
        }
        let summary = self.shared.stats.take_summary();
        summary.log();
        summary
    }

    fn spawn_transport_loop(&self, mode: LaunchMode) -> Result<AsyncLoop> {
        let shared = Arc::clone(&self.shared);
        let transport_loop = Arc::clone(&self.transport_loop);
        let backoff = Backoff::new();

        let body = move || match transport_loop.lock().iterate() {
            Ok(true) => {
                backoff.reset();
                ControlFlow::Continue(())
            }
            Ok(false) => {
                if backoff.is_completed() {
                    shared.transport.wait_for_progress(shared.config.idle_wait);
                } else {
                    backoff.snooze();
                }
                ControlFlow::Continue(())
            }
            Err(err) => {
                shared.raise_fatal("transport loop", &err);
                ControlFlow::Break(())
            }
        };

        AsyncLoop::new("maml-transport", body, mode).map_err(|e| Error::Fatal(e.to_string()))
    }

    fn spawn_dispatch_loop(&self, mode: LaunchMode) -> Result<AsyncLoop> {
        let shared = Arc::clone(&self.shared);
        let dispatch = Arc::clone(&self.dispatch);

        let body = move || match dispatch.iterate() {
            Ok(true) => ControlFlow::Continue(()),
            Ok(false) => {
                shared.inbox.wait_for_items(shared.config.idle_wait);
                ControlFlow::Continue(())
            }
            Err(err) => {
                shared.raise_fatal("dispatch loop", &err);
                ControlFlow::Break(())
            }
        };

        AsyncLoop::new("maml-dispatch", body, mode).map_err(|e| Error::Fatal(e.to_string()))
    }

    /// Runs send/probe/reap/dispatch on the calling thread, at least once and
    /// then until the outbox, inbox, collective queue and in-flight tables are
    /// empty. Caller holds the flush phase with the loops stopped.
    fn flush_remaining(&self, dispatching: &Cell<bool>) -> Result<()> {
        if dispatching.get() {
            // flush() from a handler we are running right now
            return self.flush_outgoing();
        }

        loop {
            let moved = self.transport_loop.lock().iterate();
            let mut moved = self.fatal_on_err(moved)?;

            dispatching.set(true);
            let dispatched = self.dispatch.iterate();
            dispatching.set(false);
            moved |= self.fatal_on_err(dispatched)?;

            if self.outgoing_drained() && self.shared.inbox.is_empty() {
                break;
            }
            if !moved {
                self.shared
                    .transport
                    .wait_for_progress(self.shared.config.idle_wait);
            }
        }

        self.shared.publish_flushed(false);
        Ok(())
    }

    /// Drives only the transport loop until nothing outgoing is queued or in
    /// flight. Received payloads stay in the inbox for the dispatcher.
    fn flush_outgoing(&self) -> Result<()> {
        loop {
            let moved = self.transport_loop.lock().iterate();
            let moved = self.fatal_on_err(moved)?;
            if self.outgoing_drained() {
                return Ok(());
            }
            if !moved {
                self.shared
                    .transport
                    .wait_for_progress(self.shared.config.idle_wait);
            }
        }
    }

    fn outgoing_drained(&self) -> bool {
        self.shared.outbox.is_empty()
            && self.shared.queued_collectives() == 0
            && self.transport_loop.lock().is_idle()
    }

    fn fatal_on_err<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| {
            self.shared.record_fatal("flush", &err);
            err
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(error = %err, "message layer did not stop cleanly");
        }
        self.shared.transport.detach();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.shared.transport)
            .field("running", &self.is_running())
            .field("fatal", &self.shared.fatal_error())
            .finish_non_exhaustive()
    }
}
