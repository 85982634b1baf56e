use std::mem::size_of;

use super::{hash_counter, Checksum, Header, SharedPlane, StatsSlot};
use crate::ffi;

#[test]
fn stats_mapping_layout() {
    let plane = SharedPlane::new(5).unwrap();
    let page = plane.page_size();

    // Header + slots rounded to a page, plus slack and guard pages.
    let payload = size_of::<Header>() + 5 * size_of::<StatsSlot>();
    let expect = ffi::round_up_page(payload, page) + 2 * page;
    assert_eq!(plane.stats_len(), expect);
    assert_eq!(plane.stats_len() % page, 0);
    assert_eq!(plane.header().segment_length, plane.stats_len());

    // Checksums round up to a page boundary on their own mapping.
    assert_eq!(
        plane.checksums_len(),
        ffi::round_up_page(5 * size_of::<Checksum>(), page)
    );
}

#[test]
fn slots_are_zero_initialised() {
    let plane = SharedPlane::new(3).unwrap();
    for i in 0..3 {
        let slot = unsafe { plane.slot(i) };
        assert_eq!(slot.pid, 0);
        assert_eq!(slot.ci.counter, 0);
        assert!(!slot.completed);
        let checksum = unsafe { plane.checksum(i) };
        assert_eq!(checksum.hash, 0);
    }
}

#[test]
fn slot_round_trip() {
    let plane = SharedPlane::new(2).unwrap();
    {
        let slot = unsafe { plane.slot_mut(1) };
        slot.pid = 4242;
        slot.ci.counter = 99;
        slot.ci.run_ok = true;
        let checksum = unsafe { plane.checksum_mut(1) };
        checksum.finalise(&slot.ci);
    }
    let slot = unsafe { plane.slot(1) };
    let checksum = unsafe { plane.checksum(1) };
    assert_eq!(slot.pid, 4242);
    assert!(checksum.verify(&slot.ci));
    // Slot 0 is untouched.
    assert_eq!(unsafe { plane.slot(0) }.pid, 0);
}

#[test]
fn checksum_detects_counter_corruption() {
    let plane = SharedPlane::new(1).unwrap();
    let slot = unsafe { plane.slot_mut(0) };
    slot.ci.counter = 1234;
    slot.ci.run_ok = true;
    let checksum = unsafe { plane.checksum_mut(0) };
    checksum.finalise(&slot.ci);
    assert!(checksum.verify(&slot.ci));

    // Any post-hoc bit flip in the stats slot must be detected.
    for bit in 0..64 {
        slot.ci.counter = 1234 ^ (1u64 << bit);
        assert!(!checksum.verify(&slot.ci), "bit {}", bit);
    }
    slot.ci.counter = 1234;
    slot.ci.run_ok = false;
    assert!(!checksum.verify(&slot.ci));

    slot.ci.run_ok = true;
    assert!(checksum.verify(&slot.ci));
}

#[test]
fn checksum_detects_checksum_corruption() {
    let plane = SharedPlane::new(1).unwrap();
    let slot = unsafe { plane.slot_mut(0) };
    slot.ci.counter = 77;
    let checksum = unsafe { plane.checksum_mut(0) };
    checksum.finalise(&slot.ci);

    checksum.hash ^= 1;
    assert!(!checksum.verify(&slot.ci));
    checksum.hash ^= 1;
    checksum.data.counter += 1;
    assert!(!checksum.verify(&slot.ci));
}

#[test]
fn hash_differs_across_inputs() {
    assert_ne!(hash_counter(0, false), hash_counter(0, true));
    assert_ne!(hash_counter(0, false), hash_counter(1, false));
    assert_ne!(hash_counter(1, false), hash_counter(1 << 63, false));
}

#[test]
fn sentinel_pages_are_distinct_and_readable_where_mapped_so() {
    let plane = SharedPlane::new(1).unwrap();
    let s = plane.sentinels();
    assert!(!s.none.is_null());
    assert_ne!(s.none, s.ro);
    assert_ne!(s.ro, s.wo);
    // "wo" is readable despite its name; both reads must see zero.
    assert_eq!(unsafe { std::ptr::read_volatile(s.ro) }, 0);
    assert_eq!(unsafe { std::ptr::read_volatile(s.wo) }, 0);
}

#[test]
fn log_lock_is_reentrant_across_calls() {
    let plane = SharedPlane::new(1).unwrap();
    let a = plane.with_log_lock(|| 1);
    let b = plane.with_log_lock(|| 2);
    assert_eq!((a, b), (1, 2));
}
