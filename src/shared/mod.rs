//! The shared statistics plane.
//!
//! Two anonymous `MAP_SHARED` mappings are created before the first
//! fork: one carries the header and the per-instance stats slots, the
//! other the per-instance checksum records. Keeping the checksums in a
//! separate mapping means a wild write into the stats area cannot also
//! patch up its own checksum.
//!
//! Three one-page sentinel mappings are handed to workloads to probe
//! fault behavior, and the last page of the stats mapping is a
//! `PROT_NONE` guard that traps anything smashing past the final slot.

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::ffi::{self, syscall};

mod stats;

pub use stats::*;

#[cfg(test)]
mod test;

/// Hardware cache geometry recorded at setup for workloads that size
/// their buffers to the cache (zeroes when sysfs has no answer).
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct MemCache {
    pub size: u64,
    pub level: u32,
    pub ways: u32,
}

/// Shared header at the base of the stats mapping.
///
/// The counters are advisory (the reap logic is PID-indexed); they are
/// atomics because parent and children bump them concurrently and
/// because signal handlers read them. Lock-free atomic ops are the only
/// cross-process primitive the handlers are allowed to use.
#[repr(C)]
pub struct Header {
    pub segment_length: usize,
    pub started: AtomicU32,
    pub exited: AtomicU32,
    pub reaped: AtomicU32,
    pub failed: AtomicU32,
    pub alarmed: AtomicU32,
    pub time_started: f64,
    pub caught_sigint: AtomicBool,
    /// Global continue flag, cleared to request fleet shutdown.
    pub keep_going: AtomicBool,
    /// Cleared by the deadline alarm to release the wait loop.
    pub wait_active: AtomicBool,
    /// Attribution of a user-sent SIGALRM, for diagnostics.
    pub alarm_pid: AtomicI32,
    pub alarm_uid: AtomicU32,
    pub alarm_time_bits: AtomicU64,
    log_lock: AtomicBool,
    pub mem_cache: MemCache,
}

impl Header {
    pub fn alarm_time(&self) -> f64 {
        f64::from_bits(self.alarm_time_bits.load(Ordering::Relaxed))
    }
}

/// Sentinel page addresses handed to every workload. `wo` is named for
/// its intended semantic but is mapped read-only; workloads probe it to
/// observe the fault. Historical behavior, kept.
#[derive(Clone, Copy)]
pub struct Sentinels {
    pub none: *mut u8,
    pub ro: *mut u8,
    pub wo: *mut u8,
}

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(len: usize, prot: i32, what: &'static str) -> Result<Self> {
        let ptr = syscall::mmap_shared(len, prot).map_err(|source| Error::Map { what, source })?;
        Ok(Self { ptr, len })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        match unsafe { syscall::munmap(self.ptr.as_ptr(), self.len) } {
            Ok(()) => (),
            Err(e) => panic!("Failed to unmap shared plane: {}", e),
        }
    }
}

/// The shared plane. Created once before the first fork, inherited by
/// every child through the parent's address space, unmapped on drop
/// after the last child has been reaped. Field order gives reverse
/// creation order on unwind, including when construction fails midway.
pub struct SharedPlane {
    page_wo: Mapping,
    page_ro: Mapping,
    page_none: Mapping,
    checksums: Mapping,
    stats: Mapping,
    capacity: usize,
    page_size: usize,
}

impl SharedPlane {
    /// Maps the plane for `capacity` worker instances. Every page is
    /// zero on return (anonymous mappings), which doubles as the
    /// zero-initialisation of all stats and checksum records.
    pub fn new(capacity: usize) -> Result<Self> {
        let page = ffi::page_size();
        let rw = libc::PROT_READ | libc::PROT_WRITE;

        let stats_len =
            ffi::round_up_page(size_of::<Header>() + capacity * size_of::<StatsSlot>(), page)
                + 2 * page;
        let stats = Mapping::new(stats_len, rw, "stats")?;
        // Trailing guard: anything running off the end of the slot
        // array faults instead of silently corrupting neighbours.
        unsafe {
            syscall::mprotect(stats.ptr.as_ptr().add(stats_len - page), page, libc::PROT_NONE)
        }
        .map_err(|source| Error::Map {
            what: "stats guard page",
            source,
        })?;

        let checksums_len = ffi::round_up_page((capacity * size_of::<Checksum>()).max(1), page);
        let checksums = Mapping::new(checksums_len, rw, "checksums")?;

        let page_none = Mapping::new(page, libc::PROT_NONE, "sentinel (none)")?;
        let page_ro = Mapping::new(page, libc::PROT_READ, "sentinel (ro)")?;
        let page_wo = Mapping::new(page, libc::PROT_READ, "sentinel (wo)")?;

        let plane = Self {
            page_wo,
            page_ro,
            page_none,
            checksums,
            stats,
            capacity,
            page_size: page,
        };
        plane.header().segment_length = stats_len;
        plane
            .header_atomics()
            .keep_going
            .store(true, Ordering::Relaxed);
        plane
            .header_atomics()
            .wait_active
            .store(true, Ordering::Relaxed);
        Ok(plane)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats_len(&self) -> usize {
        self.stats.len
    }

    pub fn checksums_len(&self) -> usize {
        self.checksums.len
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn header_ptr(&self) -> *mut Header {
        self.stats.ptr.as_ptr().cast()
    }

    /// Mutable view of the header's plain (non-atomic) fields. Only
    /// used before the first fork, when the parent is the sole process.
    #[allow(clippy::mut_from_ref)]
    pub fn header(&self) -> &mut Header {
        unsafe { &mut *self.header_ptr() }
    }

    /// Shared view of the header for the concurrent phase.
    pub fn header_atomics(&self) -> &Header {
        unsafe { &*self.header_ptr() }
    }

    pub fn slot_ptr(&self, index: usize) -> *mut StatsSlot {
        assert!(index < self.capacity);
        unsafe {
            self.stats
                .ptr
                .as_ptr()
                .add(size_of::<Header>())
                .cast::<StatsSlot>()
                .add(index)
        }
    }

    /// # Safety
    ///
    /// One writer per slot: a slot may only be mutated by the child
    /// that owns it (or by the parent before that child is forked /
    /// after it is reaped).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, index: usize) -> &mut StatsSlot {
        &mut *self.slot_ptr(index)
    }

    /// # Safety
    ///
    /// Caller must hold the read side of the slot discipline: the
    /// owning child has been reaped, or never started.
    pub unsafe fn slot(&self, index: usize) -> &StatsSlot {
        &*self.slot_ptr(index)
    }

    pub fn checksum_ptr(&self, index: usize) -> *mut Checksum {
        assert!(index < self.capacity);
        unsafe { self.checksums.ptr.as_ptr().cast::<Checksum>().add(index) }
    }

    /// # Safety
    ///
    /// Same discipline as [`slot_mut`](Self::slot_mut).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn checksum_mut(&self, index: usize) -> &mut Checksum {
        &mut *self.checksum_ptr(index)
    }

    /// # Safety
    ///
    /// Same discipline as [`slot`](Self::slot).
    pub unsafe fn checksum(&self, index: usize) -> &Checksum {
        &*self.checksum_ptr(index)
    }

    pub fn sentinels(&self) -> Sentinels {
        Sentinels {
            none: self.page_none.ptr.as_ptr(),
            ro: self.page_ro.ptr.as_ptr(),
            wo: self.page_wo.ptr.as_ptr(),
        }
    }

    /// Serialises multi-writer log lines from the fleet. Held across a
    /// single write, never across fork or signal delivery.
    pub fn with_log_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let lock = &self.header_atomics().log_lock;
        while lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let out = f();
        lock.store(false, Ordering::Release);
        out
    }
}
