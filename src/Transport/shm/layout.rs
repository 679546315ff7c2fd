// Wire layout of a shared memory region.
//
//   RegionHeader            control plane, one BandEntry per peer
//   band 0 .. band N-1      one ring of Slots per peer (its receive queue)
//
// Every peer may push into any band; a band is drained only by its owner.

use crossbeam_utils::CachePadded;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// "MAML_SHM"
pub const REGION_MAGIC: u64 = 0x4D41_4D4C_5F53_484D;
pub const REGION_VERSION: u32 = 1;

/// Compile-time bound on peers per region, sizes the band table.
pub const MAX_PEERS: usize = 64;

/// Largest payload a single slot carries.
pub const SLOT_PAYLOAD: usize = 4032;

/// Per-message header stored in front of the payload in each slot.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireHeader {
    pub message_id: u64,
    pub channel: u32,
    pub source: u32,
    pub tag: i32,
    pub flags: u32,
    pub payload_len: u32,
    pub reserved: u32,
}

/// One entry of a band.
///
/// The sequence word drives the ring: a producer may write a slot whose
/// sequence equals its claimed tail and publishes with `tail + 1`; the
/// consumer reads when the sequence is `head + 1` and frees the slot by
/// storing `head + capacity`.
#[repr(C, align(64))]
pub struct Slot {
    pub sequence: AtomicU64,
    pub header: WireHeader,
    pub payload: [u8; SLOT_PAYLOAD],
}

/// Control block of one peer's band.
#[repr(C, align(128))]
pub struct BandEntry {
    /// Slots in the band, a power of two.
    pub capacity: u64,

    /// Byte offset of the band from the start of the region.
    pub band_offset: u64,

    /// Bumped by producers after publishing; the owner futex-waits on it.
    pub signal: AtomicU32,

    /// Non-zero while an endpoint process holds this rank.
    pub attached: AtomicU32,

    /// Producer cursor.
    pub tail: CachePadded<AtomicU64>,

    /// Consumer cursor.
    pub head: CachePadded<AtomicU64>,
}

/// Header at offset 0 of the region.
#[repr(C, align(128))]
pub struct RegionHeader {
    pub magic: u64,
    pub version: u32,
    pub peer_count: u32,
    pub channel_count: u32,
    /// Set to 1 by the creator once every band is initialised.
    pub ready: AtomicU32,
    pub region_size: u64,
    pub next_message_id: AtomicU64,
    pub bands: [BandEntry; MAX_PEERS],
}

#[inline]
pub const fn slot_stride() -> usize {
    size_of::<Slot>()
}

/// Bytes occupied by one band of `capacity` slots, rounded to 128.
pub fn band_size(capacity: usize) -> usize {
    (capacity * slot_stride() + 127) & !127
}

/// Total region size for `peers` bands of `capacity` slots.
pub fn region_size(peers: usize, capacity: usize) -> usize {
    size_of::<RegionHeader>() + peers * band_size(capacity)
}
