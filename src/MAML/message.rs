// src/MAML/message.rs

use super::error::{Error, Result};
use crate::Transport::{Channel, Envelope, Peer, Tag};
use std::fmt;
use std::time::Instant;

/// An owned byte payload addressed to a (channel, peer, tag) triple.
///
/// The payload is never empty and keeps its size for the lifetime of the
/// message. Ownership moves from the application to the outbox, through the
/// transport loop, and on the receiving side through the inbox to the handler.
pub struct Message {
    channel: Option<Channel>,
    peer: Option<Peer>,
    tag: Tag,
    payload: Box<[u8]>,
    pub(crate) started: Option<Instant>,
}

impl Message {
    /// Allocates a zeroed payload of `size` bytes.
    pub fn with_size(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::EmptyPayload);
        }
        Ok(Self::from_boxed(vec![0u8; size].into_boxed_slice()))
    }

    /// Copies `bytes` into a new, unaddressed message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        Ok(Self::from_boxed(bytes.into()))
    }

    /// Copies `bytes` into a new message addressed to `peer` on `channel`.
    pub fn addressed(channel: Channel, peer: Peer, bytes: &[u8]) -> Result<Self> {
        let mut message = Self::from_bytes(bytes)?;
        message.address_to(channel, peer);
        Ok(message)
    }

    /// Takes ownership of `bytes` without copying.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        Ok(Self::from_boxed(bytes.into_boxed_slice()))
    }

    fn from_boxed(payload: Box<[u8]>) -> Self {
        Self {
            channel: None,
            peer: None,
            tag: 0,
            payload,
            started: None,
        }
    }

    /// Buffer for a payload announced by a probe, carrying its source address.
    pub(crate) fn for_incoming(envelope: &Envelope) -> Result<Self> {
        let mut message = Self::with_size(envelope.len)?;
        message.channel = Some(envelope.channel);
        message.peer = Some(envelope.peer);
        message.tag = envelope.tag;
        Ok(message)
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }

    /// Destination when sending, source once received.
    pub fn peer(&self) -> Option<Peer> {
        self.peer
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn set_channel(&mut self, channel: Channel) {
        self.channel = Some(channel);
    }

    pub fn set_peer(&mut self, peer: Peer) {
        self.peer = Some(peer);
    }

    pub fn set_tag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    /// Stamps destination channel and peer.
    pub fn address_to(&mut self, channel: Channel, peer: Peer) {
        self.channel = Some(channel);
        self.peer = Some(peer);
    }

    /// The (channel, peer) pair if both are set.
    pub fn address(&self) -> Option<(Channel, Peer)> {
        Some((self.channel?, self.peer?))
    }

    pub fn is_addressed(&self) -> bool {
        self.address().is_some()
    }

    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.payload.into_vec()
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Swaps in a transformed payload (compression), keeping the address.
    pub(crate) fn replace_payload(&mut self, payload: Vec<u8>) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        self.payload = payload.into_boxed_slice();
        Ok(())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("peer", &self.peer)
            .field("tag", &self.tag)
            .field("size", &self.payload.len())
            .finish()
    }
}
