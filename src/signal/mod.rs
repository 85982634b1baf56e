//! The signal plane.
//!
//! One handler set serves parent and children; the child installs the
//! same table and flips a per-process mode bit that changes what ALRM
//! means (deadline broadcast in the parent, stop-working in a child).
//!
//! Handlers only touch lock-free atomics in a plain data region
//! published before installation, call `write`/`kill`/`_exit`, and
//! format through the bounded [`fmt::LineBuf`]. They never allocate,
//! never take a lock, never enter stdio.

use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::ffi::{self, syscall};
use crate::shared::{Header, SharedPlane, StatsSlot};
use crate::status::ExitCode;

pub mod fmt;

use fmt::LineBuf;

static HEADER: AtomicPtr<Header> = AtomicPtr::new(null_mut());
static SLOTS: AtomicPtr<StatsSlot> = AtomicPtr::new(null_mut());
static NSLOTS: AtomicUsize = AtomicUsize::new(0);

/// Per-process continue flag. Forked children mutate their own
/// copy-on-write instance, so stopping one child does not stop the
/// fleet.
static LOCAL_RUN: AtomicBool = AtomicBool::new(true);
static IN_CHILD: AtomicBool = AtomicBool::new(false);
static BROADCASTS: AtomicU32 = AtomicU32::new(0);

/// Publishes the shared plane to the handlers. Must happen before
/// [`install_parent`]; the handlers treat these pointers as plain data.
pub fn publish(plane: &SharedPlane) {
    SLOTS.store(
        if plane.capacity() > 0 {
            plane.slot_ptr(0)
        } else {
            null_mut()
        },
        Ordering::Relaxed,
    );
    NSLOTS.store(plane.capacity(), Ordering::Relaxed);
    HEADER.store(plane.header() as *mut Header, Ordering::Release);
}

pub fn unpublish() {
    HEADER.store(null_mut(), Ordering::Release);
    SLOTS.store(null_mut(), Ordering::Relaxed);
    NSLOTS.store(0, Ordering::Relaxed);
}

fn header() -> Option<&'static Header> {
    let ptr = HEADER.load(Ordering::Acquire);
    unsafe { ptr.as_ref() }
}

/// Polled by workloads at their check-points and by the fleet loops.
pub fn keep_running() -> bool {
    if !LOCAL_RUN.load(Ordering::Relaxed) {
        return false;
    }
    header().map_or(true, |h| h.keep_going.load(Ordering::Relaxed))
}

/// Requests cooperative shutdown of the whole fleet.
pub fn stop_all() {
    LOCAL_RUN.store(false, Ordering::Relaxed);
    if let Some(h) = header() {
        h.keep_going.store(false, Ordering::Relaxed);
    }
}

pub fn caught_sigint() -> bool {
    header().is_some_and(|h| h.caught_sigint.load(Ordering::Relaxed))
}

/// Sends the shutdown signal to every fleet member still recorded as
/// live. Re-invocations are counted; past five attempts the signal is
/// upgraded to KILL, which ignores the per-slot `signalled` latch.
/// Async-signal-safe.
pub fn broadcast_shutdown() {
    let count = BROADCASTS.fetch_add(1, Ordering::Relaxed) + 1;
    let escalate = count > 5;
    let sig = if escalate {
        libc::SIGKILL
    } else {
        libc::SIGALRM
    };

    let slots = SLOTS.load(Ordering::Relaxed);
    if slots.is_null() {
        return;
    }
    let n = NSLOTS.load(Ordering::Relaxed);
    for i in 0..n {
        unsafe {
            let slot = slots.add(i);
            // Negative or zero pid marks a reaped or never-started slot.
            let pid = std::ptr::read_volatile(std::ptr::addr_of!((*slot).pid));
            if pid <= 0 {
                continue;
            }
            let signalled = std::ptr::read_volatile(std::ptr::addr_of!((*slot).signalled));
            if signalled && !escalate {
                continue;
            }
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot).signalled), true);
            if escalate {
                // A KILLed worker cannot finalise its counters.
                std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot).ci.force_killed), true);
            }
            let _ = syscall::kill(pid, sig);
        }
    }
}

/// Starts a fresh escalation sequence. Called once per fleet launch so
/// a previous fleet's broadcasts do not pre-escalate the next one to
/// KILL.
pub fn reset_broadcasts() {
    BROADCASTS.store(0, Ordering::Relaxed);
}

extern "C" fn on_interrupt(_sig: i32, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    if let Some(h) = header() {
        h.caught_sigint.store(true, Ordering::Relaxed);
        h.keep_going.store(false, Ordering::Relaxed);
    }
    LOCAL_RUN.store(false, Ordering::Relaxed);
    broadcast_shutdown();
}

extern "C" fn on_alarm(_sig: i32, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    // A user-sent alarm is attributed back to its sender for the
    // post-run diagnostics; kernel-raised deadline alarms carry no PID.
    if !info.is_null() {
        let si = unsafe { &*info };
        if si.si_code == libc::SI_USER {
            if let Some(h) = header() {
                #[cfg(target_os = "linux")]
                unsafe {
                    h.alarm_pid.store(si.si_pid(), Ordering::Relaxed);
                    h.alarm_uid.store(si.si_uid(), Ordering::Relaxed);
                }
                h.alarm_time_bits
                    .store(ffi::now().to_bits(), Ordering::Relaxed);
            }
        }
    }

    if IN_CHILD.load(Ordering::Relaxed) {
        // Stop this worker; its next check-point returns.
        LOCAL_RUN.store(false, Ordering::Relaxed);
        if let Some(h) = header() {
            h.alarmed.fetch_add(1, Ordering::Relaxed);
        }
    } else {
        // Global deadline: release the wait loop and shut the fleet down.
        if let Some(h) = header() {
            h.wait_active.store(false, Ordering::Relaxed);
        }
        broadcast_shutdown();
    }
}

extern "C" fn on_usr2(_sig: i32, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let mut line = LineBuf::new();
    line.push_str("load avg ");
    match syscall::getloadavg() {
        Ok(avg) => {
            line.push_fixed2(avg[0]);
            line.push_str(" ");
            line.push_fixed2(avg[1]);
            line.push_str(" ");
            line.push_fixed2(avg[2]);
        }
        Err(_) => line.push_str("?"),
    }
    #[cfg(target_os = "linux")]
    if let Ok(info) = syscall::sysinfo() {
        let unit = info.mem_unit.max(1) as u64;
        line.push_str(", mem free/total ");
        line.push_u64(info.freeram as u64 * unit / (1024 * 1024));
        line.push_str("/");
        line.push_u64(info.totalram as u64 * unit / (1024 * 1024));
        line.push_str(" MB");
    }
    line.push_str("\n");
    syscall::write_raw(libc::STDOUT_FILENO, line.as_bytes());
}

extern "C" fn on_fatal(sig: i32, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let mut line = LineBuf::new();
    line.push_str("brunt: caught fatal signal ");
    line.push_i64(sig as i64);
    line.push_str(", aborting run\n");
    syscall::write_raw(libc::STDERR_FILENO, line.as_bytes());
    broadcast_shutdown();
    unsafe { libc::_exit(ExitCode::Signaled as i32) };
}

extern "C" fn on_terminating(_sig: i32, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    if let Some(h) = header() {
        h.keep_going.store(false, Ordering::Relaxed);
    }
    LOCAL_RUN.store(false, Ordering::Relaxed);
    broadcast_shutdown();
}

fn install(sig: i32, action: usize) -> Result<()> {
    syscall::sigaction(sig, action, libc::SA_SIGINFO).map_err(|source| Error::Sigaction { sig, source })
}

const IGNORED: &[i32] = &[libc::SIGUSR1, libc::SIGTTOU, libc::SIGTTIN, libc::SIGWINCH];

const FATAL: &[i32] = &[
    libc::SIGILL,
    libc::SIGSEGV,
    libc::SIGFPE,
    libc::SIGBUS,
    libc::SIGABRT,
];

#[cfg(target_os = "linux")]
const TERMINATING: &[i32] = &[
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGSTKFLT,
    libc::SIGPWR,
    libc::SIGVTALRM,
];

// Linux has no distinct SIGINFO; glibc aliases it to SIGPWR, which the
// table above already handles.
#[cfg(not(target_os = "linux"))]
const TERMINATING: &[i32] = &[
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGINFO,
    libc::SIGVTALRM,
];

fn install_table() -> Result<()> {
    install(libc::SIGINT, on_interrupt as usize)?;
    install(libc::SIGHUP, on_interrupt as usize)?;
    install(libc::SIGALRM, on_alarm as usize)?;
    install(libc::SIGUSR2, on_usr2 as usize)?;
    for &sig in FATAL {
        install(sig, on_fatal as usize)?;
    }
    for &sig in TERMINATING {
        install(sig, on_terminating as usize)?;
    }
    for &sig in IGNORED {
        install(sig, libc::SIG_IGN)?;
    }
    Ok(())
}

/// Installs the parent's handler table. Call after [`publish`].
pub fn install_parent() -> Result<()> {
    IN_CHILD.store(false, Ordering::Relaxed);
    install_table()
}

/// Re-arms the table on the child side of a fork. Failures are ignored:
/// the child cannot report them and its deadline still bounds the run.
pub fn install_child() {
    IN_CHILD.store(true, Ordering::Relaxed);
    LOCAL_RUN.store(true, Ordering::Relaxed);
    let _ = install_table();
}

/// Restores every handled signal to its default disposition and drops
/// the published plane pointers. The shared plane may be unmapped only
/// after this returns.
pub fn uninstall() {
    let all = [libc::SIGINT, libc::SIGHUP, libc::SIGALRM, libc::SIGUSR2];
    for sig in all
        .iter()
        .chain(FATAL)
        .chain(TERMINATING)
        .chain(IGNORED)
    {
        let _ = syscall::sigaction(*sig, libc::SIG_DFL, 0);
    }
    unpublish();
}
