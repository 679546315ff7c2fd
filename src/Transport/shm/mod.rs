// Cross-process transport over a named shared memory region.
//
// Each peer owns one band (a lock-free ring) that every other peer pushes
// into. Probing drains the own band into per-channel queues of unexpected
// messages, so a channel without a registered handler never blocks the
// others.

mod band;
pub mod layout;

use self::band::Band;
use self::layout::{
    band_size, region_size, RegionHeader, WireHeader, MAX_PEERS, REGION_MAGIC, REGION_VERSION,
    SLOT_PAYLOAD,
};
use super::{Channel, Envelope, Peer, RequestHandle, Tag, Transport, TransportError};
use crate::Core::SharedMemory::{
    create_shared_memory, open_shared_memory, remove_shared_memory, SharedMemoryBackend,
};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Geometry of a region, fixed by its creator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmOptions {
    pub peers: usize,
    pub channels: usize,
    /// Slots per band; must be a power of two.
    pub band_capacity: usize,
}

impl Default for ShmOptions {
    fn default() -> Self {
        Self {
            peers: 2,
            channels: 1,
            band_capacity: 256,
        }
    }
}

impl ShmOptions {
    pub fn with_peers(mut self, peers: usize) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_band_capacity(mut self, band_capacity: usize) -> Self {
        self.band_capacity = band_capacity;
        self
    }

    fn validate(&self) -> io::Result<()> {
        let invalid = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
        if self.peers == 0 || self.peers > MAX_PEERS {
            return invalid(format!("peers must be in 1..={}, got {}", MAX_PEERS, self.peers));
        }
        if self.channels == 0 || self.channels > u32::MAX as usize {
            return invalid(format!("invalid channel count {}", self.channels));
        }
        if self.band_capacity == 0 || !self.band_capacity.is_power_of_two() {
            return invalid(format!(
                "band capacity must be a power of two and greater than zero, got {}",
                self.band_capacity
            ));
        }
        Ok(())
    }
}

struct Incoming {
    source: Peer,
    tag: Tag,
    payload: Vec<u8>,
}

/// A send the destination band had no room for yet.
struct Blocked {
    peer: Peer,
    header: WireHeader,
    payload: Box<[u8]>,
}

#[derive(Default)]
struct EndpointState {
    unexpected: HashMap<Channel, VecDeque<Incoming>>,
    claimed: HashMap<RequestHandle, Vec<u8>>,
    /// `None` once the payload sits in the destination band.
    sends: HashMap<RequestHandle, Option<Blocked>>,
}

pub struct ShmTransport {
    region: Box<dyn SharedMemoryBackend>,
    header: *const RegionHeader,
    bands: Vec<Band>,
    rank: Peer,
    owner: bool,
    claimed: AtomicBool,
    next_request: AtomicU64,
    state: Mutex<EndpointState>,
}

unsafe impl Send for ShmTransport {}
unsafe impl Sync for ShmTransport {}

impl ShmTransport {
    /// Creates and initialises region `name` and takes `rank` in it. The
    /// creator removes the region's name when dropped.
    pub fn create(name: &str, options: ShmOptions, rank: u32) -> Result<Self, TransportError> {
        options.validate()?;
        let size = region_size(options.peers, options.band_capacity);
        let region = create_shared_memory(name, size)?;
        let header_ptr = region.as_ptr() as *mut RegionHeader;

        unsafe {
            let header = &mut *header_ptr;
            header.magic = REGION_MAGIC;
            header.version = REGION_VERSION;
            header.peer_count = options.peers as u32;
            header.channel_count = options.channels as u32;
            header.region_size = size as u64;
            header.next_message_id = AtomicU64::new(1);

            let mut offset = size_of::<RegionHeader>();
            for peer in 0..options.peers {
                let entry = &mut header.bands[peer];
                entry.capacity = options.band_capacity as u64;
                entry.band_offset = offset as u64;
                entry.signal = AtomicU32::new(0);
                entry.attached = AtomicU32::new(0);
                entry.tail = CachePadded::new(AtomicU64::new(0));
                entry.head = CachePadded::new(AtomicU64::new(0));

                Band::new(entry, region.as_ptr().add(offset)).init_slots();
                offset += band_size(options.band_capacity);
            }
            header.ready.store(1, Ordering::Release);
        }

        tracing::debug!(
            name,
            size,
            peers = options.peers,
            channels = options.channels,
            band_capacity = options.band_capacity,
            "shared memory region created"
        );

        let transport = Self::bind(region, rank, true);
        if transport.is_err() {
            let _ = remove_shared_memory(name);
        }
        transport
    }

    /// Opens region `name`, created by another endpoint, and takes `rank`.
    pub fn connect(name: &str, rank: u32) -> Result<Self, TransportError> {
        let region = open_shared_memory(name)?;
        if region.size() < size_of::<RegionHeader>() {
            return Err(TransportError::RegionMismatch(format!(
                "{} bytes cannot hold the region header",
                region.size()
            )));
        }

        let header = unsafe { &*(region.as_ptr() as *const RegionHeader) };
        if header.ready.load(Ordering::Acquire) != 1 {
            return Err(TransportError::RegionMismatch(
                "region is not initialised".to_string(),
            ));
        }
        if header.magic != REGION_MAGIC {
            return Err(TransportError::RegionMismatch(format!(
                "bad magic {:#x}",
                header.magic
            )));
        }
        if header.version != REGION_VERSION {
            return Err(TransportError::RegionMismatch(format!(
                "layout version {} (expected {})",
                header.version, REGION_VERSION
            )));
        }
        if header.region_size as usize > region.size() || header.peer_count as usize > MAX_PEERS {
            return Err(TransportError::RegionMismatch(format!(
                "header describes {} bytes and {} peers, mapping has {} bytes",
                header.region_size,
                header.peer_count,
                region.size()
            )));
        }

        tracing::debug!(name, rank, "connected to shared memory region");
        Self::bind(region, rank, false)
    }

    fn bind(
        region: Box<dyn SharedMemoryBackend>,
        rank: u32,
        owner: bool,
    ) -> Result<Self, TransportError> {
        let header = region.as_ptr() as *const RegionHeader;
        let peers = unsafe { (*header).peer_count as usize };
        if rank as usize >= peers {
            return Err(TransportError::PeerOutOfRange {
                peer: Peer(rank),
                peers,
            });
        }

        let bands = (0..peers)
            .map(|peer| unsafe {
                let entry = &(*header).bands[peer];
                Band::new(entry, region.as_ptr().add(entry.band_offset as usize))
            })
            .collect();

        let own = unsafe { &(*header).bands[rank as usize] };
        if own
            .attached
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::PeerInUse(Peer(rank)));
        }

        Ok(Self {
            region,
            header,
            bands,
            rank: Peer(rank),
            owner,
            claimed: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
            state: Mutex::new(EndpointState::default()),
        })
    }

    fn header(&self) -> &RegionHeader {
        unsafe { &*self.header }
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn peers(&self) -> usize {
        self.bands.len()
    }

    pub fn channels(&self) -> usize {
        self.header().channel_count as usize
    }

    fn own_band(&self) -> &Band {
        &self.bands[self.rank.0 as usize]
    }

    fn check_channel(&self, channel: Channel) -> Result<(), TransportError> {
        if (channel.0 as usize) < self.channels() {
            Ok(())
        } else {
            Err(TransportError::UnknownChannel(channel))
        }
    }

    fn band(&self, peer: Peer) -> Result<&Band, TransportError> {
        self.bands
            .get(peer.0 as usize)
            .ok_or(TransportError::PeerOutOfRange {
                peer,
                peers: self.bands.len(),
            })
    }

    fn try_push(&self, peer: Peer, header: WireHeader, payload: &[u8]) -> Result<bool, TransportError> {
        let band = self.band(peer)?;
        if band.enqueue(header, payload) {
            band.signal_consumer();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Moves everything in the own band into the per-channel queues.
    fn drain_band(&self, state: &mut EndpointState) {
        while let Some((header, payload)) = self.own_band().dequeue() {
            let channel = Channel(header.channel);
            if self.check_channel(channel).is_err() {
                tracing::warn!(
                    %channel,
                    source = header.source,
                    "dropping message for a channel this region does not have"
                );
                continue;
            }
            state.unexpected.entry(channel).or_default().push_back(Incoming {
                source: Peer(header.source),
                tag: header.tag,
                payload,
            });
        }
    }

    fn next_request(&self) -> RequestHandle {
        RequestHandle::new(self.next_request.fetch_add(1, Ordering::Relaxed))
    }
}

impl Transport for ShmTransport {
    fn is_ready(&self) -> bool {
        self.header().ready.load(Ordering::Acquire) == 1
    }

    fn attach(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn detach(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    fn rank(&self, channel: Channel) -> Result<Peer, TransportError> {
        self.check_channel(channel)?;
        Ok(self.rank)
    }

    fn peer_count(&self, channel: Channel) -> Result<usize, TransportError> {
        self.check_channel(channel)?;
        Ok(self.peers())
    }

    fn max_message_size(&self) -> Option<usize> {
        Some(SLOT_PAYLOAD)
    }

    fn isend(
        &self,
        channel: Channel,
        peer: Peer,
        tag: Tag,
        payload: &[u8],
    ) -> Result<RequestHandle, TransportError> {
        self.check_channel(channel)?;
        if payload.len() > SLOT_PAYLOAD {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: SLOT_PAYLOAD,
            });
        }

        let header = WireHeader {
            message_id: self.header().next_message_id.fetch_add(1, Ordering::Relaxed),
            channel: channel.0,
            source: self.rank.0,
            tag,
            flags: 0,
            payload_len: payload.len() as u32,
            reserved: 0,
        };

        let request = self.next_request();
        let pending = if self.try_push(peer, header, payload)? {
            None
        } else {
            tracing::trace!(%peer, "band full, send deferred");
            Some(Blocked {
                peer,
                header,
                payload: payload.into(),
            })
        };
        self.state.lock().sends.insert(request, pending);
        Ok(request)
    }

    fn iprobe(&self, channel: Channel) -> Result<Option<Envelope>, TransportError> {
        self.check_channel(channel)?;
        let mut state = self.state.lock();
        self.drain_band(&mut state);

        Ok(state
            .unexpected
            .get(&channel)
            .and_then(VecDeque::front)
            .map(|incoming| Envelope {
                channel,
                peer: incoming.source,
                tag: incoming.tag,
                len: incoming.payload.len(),
            }))
    }

    fn irecv(&self, envelope: &Envelope) -> Result<RequestHandle, TransportError> {
        let mut state = self.state.lock();
        let queue = state
            .unexpected
            .get_mut(&envelope.channel)
            .ok_or(TransportError::NoMatchingMessage(*envelope))?;
        let matches = queue.front().is_some_and(|incoming| {
            incoming.source == envelope.peer
                && incoming.tag == envelope.tag
                && incoming.payload.len() == envelope.len
        });
        if !matches {
            return Err(TransportError::NoMatchingMessage(*envelope));
        }
        let incoming = queue
            .pop_front()
            .ok_or(TransportError::NoMatchingMessage(*envelope))?;

        let request = self.next_request();
        state.claimed.insert(request, incoming.payload);
        Ok(request)
    }

    fn test_send(&self, request: RequestHandle) -> Result<bool, TransportError> {
        let mut state = self.state.lock();
        let pending = state
            .sends
            .get_mut(&request)
            .ok_or(TransportError::UnknownRequest(request))?;

        let done = match pending {
            None => true,
            Some(blocked) => self.try_push(blocked.peer, blocked.header, &blocked.payload)?,
        };
        if done {
            state.sends.remove(&request);
        }
        Ok(done)
    }

    fn test_recv(&self, request: RequestHandle, buffer: &mut [u8]) -> Result<bool, TransportError> {
        let payload = self
            .state
            .lock()
            .claimed
            .remove(&request)
            .ok_or(TransportError::UnknownRequest(request))?;

        if payload.len() != buffer.len() {
            return Err(TransportError::BufferSizeMismatch {
                buffer: buffer.len(),
                payload: payload.len(),
            });
        }
        buffer.copy_from_slice(&payload);
        Ok(true)
    }

    fn wait_for_progress(&self, timeout: Duration) {
        self.own_band().wait_for_data(timeout);
    }
}

impl Drop for ShmTransport {
    fn drop(&mut self) {
        let own = &self.header().bands[self.rank.0 as usize];
        own.attached.store(0, Ordering::Release);

        if self.owner {
            if let Err(err) = remove_shared_memory(self.region.name()) {
                tracing::warn!(name = self.region.name(), error = %err, "could not remove shared memory region");
            }
        }
    }
}

impl fmt::Debug for ShmTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmTransport")
            .field("name", &self.region.name())
            .field("rank", &self.rank.0)
            .field("peers", &self.bands.len())
            .field("channels", &self.channels())
            .field("owner", &self.owner)
            .finish()
    }
}
