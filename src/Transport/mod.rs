// Non-blocking transport contract driven by the transport loop.
//
// A transport moves raw payload bytes between peers of a channel. Addressing
// (channel, peer, tag) travels in the transport's own envelope; the payload is
// never inspected.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod local;
pub mod shm;

pub use local::{LocalEndpoint, LocalFabric};
pub use shm::layout::SLOT_PAYLOAD;
pub use shm::{ShmOptions, ShmTransport};

/// Opaque handle to a logical group of peers (a communicator).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub u32);

/// Addressable endpoint within a channel (a rank).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peer(pub u32);

/// Application-defined sub-classification of messages on a channel/peer pair.
pub type Tag = i32;

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer {}", self.0)
    }
}

/// Handle to an in-flight send or receive issued to a transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a probe reports about a waiting payload: where it came from and how
/// many bytes the receiver has to allocate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub channel: Channel,
    /// Source peer of the waiting payload.
    pub peer: Peer,
    pub tag: Tag,
    pub len: usize,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown {0}")]
    UnknownChannel(Channel),

    #[error("{peer} out of range (channel has {peers} peers)")]
    PeerOutOfRange { peer: Peer, peers: usize },

    #[error("unknown request {0:?}")]
    UnknownRequest(RequestHandle),

    #[error("no probed message matches {0:?}")]
    NoMatchingMessage(Envelope),

    #[error("receive buffer holds {buffer} bytes, payload has {payload}")]
    BufferSizeMismatch { buffer: usize, payload: usize },

    #[error("payload of {size} bytes exceeds transport limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("{0} is already connected")]
    PeerInUse(Peer),

    #[error("shared memory region mismatch: {0}")]
    RegionMismatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Non-blocking transport driven by a single transport loop.
///
/// Every operation returns promptly; the only call allowed to suspend is
/// [`Transport::wait_for_progress`], and only up to its timeout. Errors are
/// treated as fatal by the caller.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Whether the underlying transport has been brought up by the host.
    fn is_ready(&self) -> bool;

    /// Claims the endpoint for one message layer. Returns `false` when it is
    /// already claimed.
    fn attach(&self) -> bool;

    /// Releases a claim taken by [`Transport::attach`].
    fn detach(&self);

    /// This endpoint's own peer id on `channel`.
    fn rank(&self, channel: Channel) -> Result<Peer, TransportError>;

    /// Number of peers on `channel`; valid peer ids are `0..peer_count`.
    fn peer_count(&self, channel: Channel) -> Result<usize, TransportError>;

    /// Largest payload the transport can carry, if bounded.
    fn max_message_size(&self) -> Option<usize> {
        None
    }

    /// Starts sending `payload` to `peer` on `channel`.
    fn isend(
        &self,
        channel: Channel,
        peer: Peer,
        tag: Tag,
        payload: &[u8],
    ) -> Result<RequestHandle, TransportError>;

    /// Reports the next payload waiting on `channel`, without consuming it.
    fn iprobe(&self, channel: Channel) -> Result<Option<Envelope>, TransportError>;

    /// Starts receiving the payload described by a preceding probe.
    fn irecv(&self, envelope: &Envelope) -> Result<RequestHandle, TransportError>;

    /// Returns `true` once the send no longer needs the caller's buffer. A
    /// completed request handle is retired and must not be tested again.
    fn test_send(&self, request: RequestHandle) -> Result<bool, TransportError>;

    /// Returns `true` once the payload has been copied into `buffer`, which
    /// must be exactly the probed length. A completed handle is retired.
    fn test_recv(&self, request: RequestHandle, buffer: &mut [u8])
        -> Result<bool, TransportError>;

    /// Suspends until something may have arrived for this endpoint, or until
    /// `timeout` passes.
    fn wait_for_progress(&self, timeout: Duration);
}
