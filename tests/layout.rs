// Layout conformance tests for the shared memory wire format.
// Every process mapping a region must agree on these sizes and offsets.
use dmxp_maml::Transport::shm::layout::{
    region_size, slot_stride, BandEntry, RegionHeader, Slot, WireHeader, MAX_PEERS, SLOT_PAYLOAD,
};
use memoffset::offset_of;
use std::mem::{align_of, size_of};

#[test]
fn test_wire_header_layout() {
    let size = size_of::<WireHeader>();
    let align = align_of::<WireHeader>();
    println!(
        "WireHeader => size: {size}, align: {align}, offsets: [message_id:{}, channel:{}, source:{}, tag:{}, flags:{}, payload_len:{}]",
        offset_of!(WireHeader, message_id),
        offset_of!(WireHeader, channel),
        offset_of!(WireHeader, source),
        offset_of!(WireHeader, tag),
        offset_of!(WireHeader, flags),
        offset_of!(WireHeader, payload_len),
    );

    assert_eq!(size, 32);
    assert_eq!(align, align_of::<u64>());
    assert_eq!(offset_of!(WireHeader, message_id), 0);
    assert_eq!(offset_of!(WireHeader, channel), 8);
    assert_eq!(offset_of!(WireHeader, source), 12);
    assert_eq!(offset_of!(WireHeader, tag), 16);
    assert_eq!(offset_of!(WireHeader, flags), 20);
    assert_eq!(offset_of!(WireHeader, payload_len), 24);
    assert_eq!(offset_of!(WireHeader, reserved), 28);
}

#[test]
fn test_slot_layout() {
    assert_eq!(offset_of!(Slot, sequence), 0);
    assert_eq!(offset_of!(Slot, header), 8);
    assert_eq!(offset_of!(Slot, payload), 40);
    assert_eq!(align_of::<Slot>(), 64);
    // header plus payload fill a 4 KiB stride exactly
    assert_eq!(8 + size_of::<WireHeader>() + SLOT_PAYLOAD, 4072);
    assert_eq!(slot_stride(), 4096);
}

#[test]
fn test_band_entry_layout() {
    assert_eq!(align_of::<BandEntry>(), 128);
    assert_eq!(size_of::<BandEntry>() % 128, 0);
    assert_eq!(offset_of!(BandEntry, capacity), 0);
    assert_eq!(offset_of!(BandEntry, band_offset), 8);
    assert_eq!(offset_of!(BandEntry, signal), 16);
    assert_eq!(offset_of!(BandEntry, attached), 20);
    // head and tail never share a cache line
    let tail = offset_of!(BandEntry, tail);
    let head = offset_of!(BandEntry, head);
    assert!(head - tail >= 64, "tail: {tail}, head: {head}");
}

#[test]
fn test_region_header_layout() {
    assert_eq!(align_of::<RegionHeader>(), 128);
    assert_eq!(offset_of!(RegionHeader, magic), 0);
    assert_eq!(offset_of!(RegionHeader, bands) % 128, 0);
    assert!(size_of::<RegionHeader>() >= MAX_PEERS * size_of::<BandEntry>());

    let two_peers = region_size(2, 16);
    assert_eq!(two_peers, size_of::<RegionHeader>() + 2 * 16 * slot_stride());
    assert_eq!(two_peers % 128, 0);
}
