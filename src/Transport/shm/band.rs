use super::layout::{slot_stride, BandEntry, Slot, WireHeader, SLOT_PAYLOAD};
use crate::Core::futex;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::time::Duration;

/// Lock-free MPMC ring view over one peer's band.
///
/// Not stored in shared memory itself; it only holds pointers into the
/// mapped region and must not outlive the mapping.
pub(crate) struct Band {
    entry: *const BandEntry,
    base: *mut u8,
    capacity: usize,
    mask: usize,
}

unsafe impl Send for Band {}
unsafe impl Sync for Band {}

impl Band {
    /// # Safety
    /// `entry` must point at an initialised band entry, and `base` at the
    /// band it describes, both inside a mapping that outlives the view.
    pub unsafe fn new(entry: *const BandEntry, base: *mut u8) -> Self {
        let capacity = (*entry).capacity as usize;
        Self {
            entry,
            base,
            capacity,
            mask: capacity - 1,
        }
    }

    /// Seeds slot `k` with sequence `k`. Creator only, before any peer
    /// connects.
    ///
    /// # Safety
    /// The band memory must be writable and not yet shared.
    pub unsafe fn init_slots(&self) {
        for k in 0..self.capacity {
            (*self.slot(k)).sequence.store(k as u64, Relaxed);
        }
    }

    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut Slot {
        self.base.add(index * slot_stride()) as *mut Slot
    }

    #[inline]
    fn entry(&self) -> &BandEntry {
        unsafe { &*self.entry }
    }

    /// Publishes one message. Returns `false` when the band is full.
    pub fn enqueue(&self, header: WireHeader, payload: &[u8]) -> bool {
        debug_assert!(payload.len() <= SLOT_PAYLOAD);
        let tail_cursor = &self.entry().tail;

        loop {
            let tail = tail_cursor.load(Relaxed);
            let slot = unsafe { self.slot((tail as usize) & self.mask) };
            let seq = unsafe { &(*slot).sequence }.load(Acquire);
            let dif = seq as i64 - tail as i64;

            if dif == 0 {
                if tail_cursor
                    .compare_exchange_weak(tail, tail + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    let len = payload.len().min(SLOT_PAYLOAD);
                    unsafe {
                        (*slot).header = header;
                        (*slot).header.payload_len = len as u32;
                        ptr::copy_nonoverlapping(
                            payload.as_ptr(),
                            (*slot).payload.as_mut_ptr(),
                            len,
                        );
                        (*slot).sequence.store(tail + 1, Release);
                    }
                    return true;
                }
            } else if dif < 0 {
                return false;
            } else {
                // another producer moved tail past us
                std::hint::spin_loop();
            }
        }
    }

    /// Takes the oldest published message, if any.
    pub fn dequeue(&self) -> Option<(WireHeader, Vec<u8>)> {
        let head_cursor = &self.entry().head;

        loop {
            let head = head_cursor.load(Relaxed);
            let slot = unsafe { self.slot((head as usize) & self.mask) };
            let seq = unsafe { &(*slot).sequence }.load(Acquire);
            let dif = seq as i64 - (head as i64 + 1);

            if dif == 0 {
                if head_cursor
                    .compare_exchange_weak(head, head + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    let message = unsafe {
                        let header = (*slot).header;
                        let len = (header.payload_len as usize).min(SLOT_PAYLOAD);
                        let payload = (&(*slot).payload)[..len].to_vec();
                        (header, payload)
                    };
                    unsafe {
                        (*slot)
                            .sequence
                            .store(head + self.capacity as u64, Release);
                    }
                    return Some(message);
                }
            } else if dif < 0 {
                return None;
            } else {
                // producer claimed the slot but has not published yet
                std::hint::spin_loop();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let entry = self.entry();
        entry.head.load(Acquire) >= entry.tail.load(Acquire)
    }

    pub fn len(&self) -> usize {
        let entry = self.entry();
        entry
            .tail
            .load(Acquire)
            .saturating_sub(entry.head.load(Acquire)) as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tells the owner something was published.
    pub fn signal_consumer(&self) {
        let signal = &self.entry().signal;
        signal.fetch_add(1, Release);
        futex::futex_wake(signal);
    }

    /// Owner side: sleeps until a producer signals or `timeout` passes.
    pub fn wait_for_data(&self, timeout: Duration) {
        let signal = &self.entry().signal;
        let seen = signal.load(Acquire);
        if !self.is_empty() {
            return;
        }
        futex::futex_wait(signal, seen, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::CachePadded;
    use std::alloc::{alloc_zeroed, dealloc, Layout};
    use std::sync::atomic::{AtomicU32, AtomicU64};

    struct Backing {
        entry: Box<BandEntry>,
        base: *mut u8,
        layout: Layout,
    }

    impl Backing {
        fn new(capacity: usize) -> Self {
            let layout = Layout::from_size_align(capacity * slot_stride(), 128).unwrap();
            let base = unsafe { alloc_zeroed(layout) };
            assert!(!base.is_null(), "failed to allocate band backing");
            let entry = Box::new(BandEntry {
                capacity: capacity as u64,
                band_offset: 0,
                signal: AtomicU32::new(0),
                attached: AtomicU32::new(0),
                tail: CachePadded::new(AtomicU64::new(0)),
                head: CachePadded::new(AtomicU64::new(0)),
            });
            Self { entry, base, layout }
        }

        fn band(&self) -> Band {
            let band = unsafe { Band::new(&*self.entry, self.base) };
            unsafe { band.init_slots() };
            band
        }
    }

    impl Drop for Backing {
        fn drop(&mut self) {
            unsafe { dealloc(self.base, self.layout) };
        }
    }

    fn header(tag: i32) -> WireHeader {
        WireHeader {
            tag,
            ..WireHeader::default()
        }
    }

    #[test]
    fn enqueue_then_dequeue() {
        let backing = Backing::new(16);
        let band = backing.band();

        assert!(band.is_empty());
        assert!(band.enqueue(header(3), &[1, 2, 3, 4]));
        assert_eq!(band.len(), 1);

        let (out, data) = band.dequeue().unwrap();
        assert_eq!(out.tag, 3);
        assert_eq!(out.payload_len, 4);
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert!(band.dequeue().is_none());
    }

    #[test]
    fn full_band_rejects_until_drained() {
        let backing = Backing::new(4);
        let band = backing.band();

        for _ in 0..4 {
            assert!(band.enqueue(header(0), &[0u8; 8]));
        }
        assert!(!band.enqueue(header(0), &[0u8; 8]));

        assert!(band.dequeue().is_some());
        assert!(band.enqueue(header(0), &[0u8; 8]));
        assert_eq!(band.len(), band.capacity());
    }

    #[test]
    fn producers_and_single_consumer_keep_per_producer_order() {
        let backing = Backing::new(8);
        let band = backing.band();
        const PER_PRODUCER: u32 = 200;

        crossbeam_utils::thread::scope(|s| {
            for producer in 0..3u32 {
                let band = &band;
                s.spawn(move |_| {
                    for i in 0..PER_PRODUCER {
                        let mut payload = producer.to_le_bytes().to_vec();
                        payload.extend_from_slice(&i.to_le_bytes());
                        while !band.enqueue(header(producer as i32), &payload) {
                            std::hint::spin_loop();
                        }
                    }
                });
            }

            let mut next = [0u32; 3];
            let mut received = 0;
            while received < 3 * PER_PRODUCER {
                match band.dequeue() {
                    Some((out, data)) => {
                        let producer = u32::from_le_bytes(data[..4].try_into().unwrap());
                        let seq = u32::from_le_bytes(data[4..].try_into().unwrap());
                        assert_eq!(out.tag, producer as i32);
                        assert_eq!(seq, next[producer as usize]);
                        next[producer as usize] += 1;
                        received += 1;
                    }
                    None => std::hint::spin_loop(),
                }
            }
        })
        .unwrap();
    }
}
