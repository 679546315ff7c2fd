// In-process transport: every rank lives in the same address space.
//
// Each endpoint owns a queue of unexpected packets per channel. A send
// enqueues a packet at the destination; a probe peeks at the front of the
// queue; a receive claims it. With rendezvous enabled, a send only completes
// once the receiver has claimed the packet.

use super::{Channel, Envelope, Peer, RequestHandle, Tag, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Packet {
    source: Peer,
    tag: Tag,
    payload: Box<[u8]>,
    delivered: Arc<AtomicBool>,
}

#[derive(Default)]
struct Queues {
    unexpected: HashMap<Channel, VecDeque<Packet>>,
    claimed: HashMap<RequestHandle, Packet>,
    /// Bumped on every arrival or completed rendezvous.
    events: u64,
}

#[derive(Default)]
struct PeerState {
    queues: Mutex<Queues>,
    changed: Condvar,
    attached: AtomicBool,
    sends: Mutex<HashMap<RequestHandle, Arc<AtomicBool>>>,
}

impl PeerState {
    fn notify(&self) {
        self.queues.lock().events += 1;
        self.changed.notify_all();
    }
}

struct FabricInner {
    peers: Vec<PeerState>,
    next_channel: AtomicU32,
    next_request: AtomicU64,
    rendezvous: bool,
}

impl FabricInner {
    fn check_channel(&self, channel: Channel) -> Result<(), TransportError> {
        if channel.0 < self.next_channel.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::UnknownChannel(channel))
        }
    }

    fn peer(&self, peer: Peer) -> Result<&PeerState, TransportError> {
        self.peers
            .get(peer.0 as usize)
            .ok_or(TransportError::PeerOutOfRange {
                peer,
                peers: self.peers.len(),
            })
    }

    fn next_request(&self) -> RequestHandle {
        RequestHandle::new(self.next_request.fetch_add(1, Ordering::Relaxed))
    }
}

/// A group of in-process ranks. Every channel opened on the fabric spans all
/// of them.
#[derive(Clone)]
pub struct LocalFabric {
    inner: Arc<FabricInner>,
}

impl LocalFabric {
    /// Fabric with `peers` ranks and eager sends: a send completes as soon as
    /// the payload is queued at the destination.
    pub fn new(peers: usize) -> Self {
        Self::build(peers, false)
    }

    /// Fabric whose sends complete only once the receiver has claimed them.
    pub fn rendezvous(peers: usize) -> Self {
        Self::build(peers, true)
    }

    fn build(peers: usize, rendezvous: bool) -> Self {
        Self {
            inner: Arc::new(FabricInner {
                peers: (0..peers).map(|_| PeerState::default()).collect(),
                next_channel: AtomicU32::new(0),
                next_request: AtomicU64::new(1),
                rendezvous,
            }),
        }
    }

    pub fn peers(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn open_channel(&self) -> Channel {
        Channel(self.inner.next_channel.fetch_add(1, Ordering::AcqRel))
    }

    /// Endpoint for `rank`. Several handles to the same rank share its queues
    /// and its attach claim.
    pub fn endpoint(&self, rank: u32) -> Result<Arc<LocalEndpoint>, TransportError> {
        self.inner.peer(Peer(rank))?;
        Ok(Arc::new(LocalEndpoint {
            fabric: Arc::clone(&self.inner),
            rank: Peer(rank),
        }))
    }
}

impl fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFabric")
            .field("peers", &self.inner.peers.len())
            .field("channels", &self.inner.next_channel.load(Ordering::Relaxed))
            .field("rendezvous", &self.inner.rendezvous)
            .finish()
    }
}

pub struct LocalEndpoint {
    fabric: Arc<FabricInner>,
    rank: Peer,
}

impl LocalEndpoint {
    fn own(&self) -> &PeerState {
        &self.fabric.peers[self.rank.0 as usize]
    }
}

impl fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("rank", &self.rank.0)
            .field("peers", &self.fabric.peers.len())
            .finish()
    }
}

impl Transport for LocalEndpoint {
    fn is_ready(&self) -> bool {
        true
    }

    fn attach(&self) -> bool {
        !self.own().attached.swap(true, Ordering::AcqRel)
    }

    fn detach(&self) {
        self.own().attached.store(false, Ordering::Release);
    }

    fn rank(&self, channel: Channel) -> Result<Peer, TransportError> {
        self.fabric.check_channel(channel)?;
        Ok(self.rank)
    }

    fn peer_count(&self, channel: Channel) -> Result<usize, TransportError> {
        self.fabric.check_channel(channel)?;
        Ok(self.fabric.peers.len())
    }

    fn isend(
        &self,
        channel: Channel,
        peer: Peer,
        tag: Tag,
        payload: &[u8],
    ) -> Result<RequestHandle, TransportError> {
        self.fabric.check_channel(channel)?;
        let destination = self.fabric.peer(peer)?;

        let delivered = Arc::new(AtomicBool::new(!self.fabric.rendezvous));
        let request = self.fabric.next_request();
        self.own().sends.lock().insert(request, Arc::clone(&delivered));

        {
            let mut queues = destination.queues.lock();
            queues.unexpected.entry(channel).or_default().push_back(Packet {
                source: self.rank,
                tag,
                payload: payload.into(),
                delivered,
            });
            queues.events += 1;
        }
        destination.changed.notify_all();
        Ok(request)
    }

    fn iprobe(&self, channel: Channel) -> Result<Option<Envelope>, TransportError> {
        self.fabric.check_channel(channel)?;
        let queues = self.own().queues.lock();
        Ok(queues
            .unexpected
            .get(&channel)
            .and_then(VecDeque::front)
            .map(|packet| Envelope {
                channel,
                peer: packet.source,
                tag: packet.tag,
                len: packet.payload.len(),
            }))
    }

    fn irecv(&self, envelope: &Envelope) -> Result<RequestHandle, TransportError> {
        self.fabric.check_channel(envelope.channel)?;
        let request = self.fabric.next_request();

        let source = {
            let mut queues = self.own().queues.lock();
            let queue = queues
                .unexpected
                .get_mut(&envelope.channel)
                .ok_or(TransportError::NoMatchingMessage(*envelope))?;
            let matches = queue.front().is_some_and(|packet| {
                packet.source == envelope.peer
                    && packet.tag == envelope.tag
                    && packet.payload.len() == envelope.len
            });
            if !matches {
                return Err(TransportError::NoMatchingMessage(*envelope));
            }
            let packet = queue
                .pop_front()
                .ok_or(TransportError::NoMatchingMessage(*envelope))?;
            packet.delivered.store(true, Ordering::Release);
            let source = packet.source;
            queues.claimed.insert(request, packet);
            source
        };

        if self.fabric.rendezvous {
            self.fabric.peer(source)?.notify();
        }
        Ok(request)
    }

    fn test_send(&self, request: RequestHandle) -> Result<bool, TransportError> {
        let mut sends = self.own().sends.lock();
        let done = sends
            .get(&request)
            .ok_or(TransportError::UnknownRequest(request))?
            .load(Ordering::Acquire);
        if done {
            sends.remove(&request);
        }
        Ok(done)
    }

    fn test_recv(&self, request: RequestHandle, buffer: &mut [u8]) -> Result<bool, TransportError> {
        let packet = self
            .own()
            .queues
            .lock()
            .claimed
            .remove(&request)
            .ok_or(TransportError::UnknownRequest(request))?;

        if packet.payload.len() != buffer.len() {
            return Err(TransportError::BufferSizeMismatch {
                buffer: buffer.len(),
                payload: packet.payload.len(),
            });
        }
        buffer.copy_from_slice(&packet.payload);
        Ok(true)
    }

    fn wait_for_progress(&self, timeout: Duration) {
        let own = self.own();
        let mut queues = own.queues.lock();
        let seen = queues.events;
        own.changed
            .wait_while_for(&mut queues, |queues| queues.events == seen, timeout);
    }
}
