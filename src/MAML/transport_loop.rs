// src/MAML/transport_loop.rs

use super::collective::Collective;
use super::error::{Error, Result};
use super::message::Message;
use super::pending::PendingTable;
use super::shared::Shared;
use std::sync::Arc;
use std::time::Instant;

/// Non-blocking I/O engine. Owns the correlation tables of in-flight sends
/// and receives; only one driver (the background loop, or the flush phase
/// once that loop is stopped) touches it at a time.
pub(crate) struct TransportLoop {
    shared: Arc<Shared>,
    sends: PendingTable,
    recvs: PendingTable,
    collectives: Vec<Box<dyn Collective>>,
}

impl TransportLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            sends: PendingTable::new(),
            recvs: PendingTable::new(),
            collectives: Vec::new(),
        }
    }

    /// One pass: flush outbox, start queued collectives, probe, reap sends,
    /// poll collectives, reap receives. Returns whether anything moved.
    pub fn iterate(&mut self) -> Result<bool> {
        let mut progress = self.flush_outbox()?;
        progress |= self.start_collectives()?;
        progress |= self.probe()?;
        progress |= self.reap_sends()?;
        progress |= self.reap_collectives()?;
        progress |= self.reap_receives()?;

        self.shared.publish_flushed(!self.is_idle());
        Ok(progress)
    }

    /// Nothing in flight in either direction.
    pub fn is_idle(&self) -> bool {
        self.sends.is_empty() && self.recvs.is_empty() && self.collectives.is_empty()
    }

    pub fn pending_sends(&self) -> usize {
        self.sends.len()
    }

    pub fn pending_recvs(&self) -> usize {
        self.recvs.len()
    }

    pub fn pending_collectives(&self) -> usize {
        self.collectives.len()
    }

    fn flush_outbox(&mut self) -> Result<bool> {
        let outgoing = self.shared.outbox.drain_all();
        if outgoing.is_empty() {
            return Ok(false);
        }

        let transport = &self.shared.transport;
        for mut message in outgoing {
            let (channel, peer) = message.address().ok_or(Error::Unaddressed {
                channel: message.channel(),
                peer: message.peer(),
            })?;

            // Don't send to ourself, hand it to the inbox directly
            if transport.rank(channel)? == peer {
                if !self.shared.has_handler(channel) {
                    return Err(Error::NoHandler(channel));
                }
                tracing::trace!(%channel, %peer, size = message.size(), "self-addressed message");
                self.shared.inbox.push(message);
                continue;
            }

            let request = transport.isend(channel, peer, message.tag(), message.data())?;
            tracing::trace!(
                %channel,
                %peer,
                tag = message.tag(),
                size = message.size(),
                "send issued"
            );
            if self.shared.config.detailed_logging {
                message.started = Some(Instant::now());
            }
            self.sends.push(request, message);
        }
        Ok(true)
    }

    fn start_collectives(&mut self) -> Result<bool> {
        let queued = std::mem::take(&mut *self.shared.collectives.lock());
        if queued.is_empty() {
            return Ok(false);
        }

        let transport = &*self.shared.transport;
        for mut collective in queued {
            collective.start(transport)?;
            tracing::trace!(pending = self.collectives.len() + 1, "collective started");
            self.collectives.push(collective);
        }
        Ok(true)
    }

    fn reap_collectives(&mut self) -> Result<bool> {
        let transport = &*self.shared.transport;
        let before = self.collectives.len();
        let mut i = 0;
        while i < self.collectives.len() {
            if self.collectives[i].finished(transport)? {
                self.collectives.swap_remove(i);
            } else {
                i += 1;
            }
        }
        Ok(self.collectives.len() != before)
    }

    fn probe(&mut self) -> Result<bool> {
        let transport = &self.shared.transport;
        let mut progress = false;

        for channel in self.shared.registered_channels() {
            while let Some(envelope) = transport.iprobe(channel)? {
                let mut message = Message::for_incoming(&envelope)?;
                let request = transport.irecv(&envelope)?;
                tracing::trace!(
                    %channel,
                    peer = %envelope.peer,
                    tag = envelope.tag,
                    size = envelope.len,
                    "receive issued"
                );
                if self.shared.config.detailed_logging {
                    message.started = Some(Instant::now());
                }
                self.recvs.push(request, message);
                progress = true;
            }
        }
        Ok(progress)
    }

    fn reap_sends(&mut self) -> Result<bool> {
        if self.sends.is_empty() {
            return Ok(false);
        }

        let transport = &self.shared.transport;
        let completed = self
            .sends
            .reap(|request, _| transport.test_send(request))?;

        if let Some(stats) = self.shared.stats() {
            for message in &completed {
                if let Some(started) = message.started {
                    stats.record_send(started.elapsed());
                }
            }
        }
        Ok(!completed.is_empty())
    }

    fn reap_receives(&mut self) -> Result<bool> {
        if self.recvs.is_empty() {
            return Ok(false);
        }

        let transport = &self.shared.transport;
        let completed = self
            .recvs
            .reap(|request, message| transport.test_recv(request, message.data_mut()))?;

        if completed.is_empty() {
            transport.wait_for_progress(self.shared.config.idle_wait);
            return Ok(false);
        }

        if let Some(stats) = self.shared.stats() {
            for message in &completed {
                if let Some(started) = message.started {
                    stats.record_recv(started.elapsed());
                }
            }
        }
        self.shared.inbox.push_all(completed);
        Ok(true)
    }
}
