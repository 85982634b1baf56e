use std::io::{Error, Result};
use std::ptr::{null_mut, NonNull};

pub fn mmap_shared(len: usize, prot: i32) -> Result<NonNull<u8>> {
    let flags = libc::MAP_SHARED | libc::MAP_ANONYMOUS;
    let ptr = unsafe { libc::mmap(null_mut(), len, prot, flags, -1, 0) };
    if ptr != libc::MAP_FAILED {
        // mmap never yields null for a successful anonymous mapping.
        Ok(unsafe { NonNull::new_unchecked(ptr.cast()) })
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap(ptr: *mut u8, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn mprotect(ptr: *mut u8, len: usize, prot: i32) -> Result<()> {
    let result = libc::mprotect(ptr as _, len, prot);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

/// Returns `0` in the child, the child PID in the parent.
pub fn fork() -> Result<i32> {
    let pid = unsafe { libc::fork() };
    if pid != -1 {
        Ok(pid)
    } else {
        Err(Error::last_os_error())
    }
}

/// Returns `(pid, status)` of the reaped process, `(0, 0)` if
/// `WNOHANG` was requested and no child has changed state yet.
pub fn waitpid(pid: i32, flags: i32) -> Result<(i32, i32)> {
    let mut status = 0;
    let result = unsafe { libc::waitpid(pid, &mut status, flags) };
    if result != -1 {
        Ok((result, status))
    } else {
        Err(Error::last_os_error())
    }
}

pub fn kill(pid: i32, sig: i32) -> Result<()> {
    let result = unsafe { libc::kill(pid, sig) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn alarm(secs: u32) -> u32 {
    unsafe { libc::alarm(secs) }
}

pub fn getrusage(who: i32) -> Result<libc::rusage> {
    let mut usage = unsafe { std::mem::zeroed::<libc::rusage>() };
    let result = unsafe { libc::getrusage(who, &mut usage) };
    if result != -1 {
        Ok(usage)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn times() -> Result<libc::tms> {
    let mut tms = unsafe { std::mem::zeroed::<libc::tms>() };
    let result = unsafe { libc::times(&mut tms) };
    if result == -1 as libc::clock_t {
        Err(Error::last_os_error())
    } else {
        Ok(tms)
    }
}

pub fn sysconf(name: i32) -> Result<i64> {
    let result = unsafe { libc::sysconf(name) };
    if result != -1 {
        Ok(result as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn clock_gettime(clock: libc::clockid_t) -> Result<libc::timespec> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let result = unsafe { libc::clock_gettime(clock, &mut ts) };
    if result != -1 {
        Ok(ts)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn getloadavg() -> Result<[f64; 3]> {
    let mut avg = [0f64; 3];
    let result = unsafe { libc::getloadavg(avg.as_mut_ptr(), 3) };
    if result == 3 {
        Ok(avg)
    } else {
        Err(Error::last_os_error())
    }
}

/// Raw `write(2)`, async-signal-safe. Handlers have no error channel,
/// so the raw return value is passed through untouched.
pub fn write_raw(fd: i32, buf: &[u8]) -> isize {
    unsafe { libc::write(fd, buf.as_ptr() as _, buf.len()) }
}

pub fn sigaction(sig: i32, action: usize, flags: i32) -> Result<()> {
    let mut act = unsafe { std::mem::zeroed::<libc::sigaction>() };
    act.sa_sigaction = action;
    act.sa_flags = flags;
    unsafe { libc::sigemptyset(&mut act.sa_mask) };
    let result = unsafe { libc::sigaction(sig, &act, null_mut()) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn sched_getaffinity(pid: i32) -> Result<libc::cpu_set_t> {
    let mut set = unsafe { std::mem::zeroed::<libc::cpu_set_t>() };
    let size = std::mem::size_of::<libc::cpu_set_t>();
    let result = unsafe { libc::sched_getaffinity(pid, size, &mut set) };
    if result != -1 {
        Ok(set)
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn sched_setaffinity(pid: i32, set: &libc::cpu_set_t) -> Result<()> {
    let size = std::mem::size_of::<libc::cpu_set_t>();
    let result = unsafe { libc::sched_setaffinity(pid, size, set) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/ioprio.h
#[cfg(target_os = "linux")]
pub const IOPRIO_CLASS_IDLE: i32 = 3;
#[cfg(target_os = "linux")]
const IOPRIO_WHO_PROCESS: i32 = 1;
#[cfg(target_os = "linux")]
const IOPRIO_CLASS_SHIFT: i32 = 13;

#[cfg(target_os = "linux")]
pub fn ioprio_set_self(class: i32, level: i32) -> Result<()> {
    let prio = (class << IOPRIO_CLASS_SHIFT) | level;
    let result = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, prio) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn prctl_set_name(name: &str) -> Result<()> {
    // PR_SET_NAME copies at most 16 bytes including the terminator.
    let mut buf = [0u8; 16];
    let len = name.len().min(15);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    let result = unsafe { libc::prctl(libc::PR_SET_NAME, buf.as_ptr()) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn prctl_set_dumpable(dumpable: bool) -> Result<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, dumpable as libc::c_ulong) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn prctl_set_pdeathsig(sig: i32) -> Result<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, sig as libc::c_ulong) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
pub fn sysinfo() -> Result<libc::sysinfo> {
    let mut info = unsafe { std::mem::zeroed::<libc::sysinfo>() };
    let result = unsafe { libc::sysinfo(&mut info) };
    if result != -1 {
        Ok(info)
    } else {
        Err(Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub const IOPRIO_CLASS_IDLE: i32 = 0;

#[cfg(not(target_os = "linux"))]
pub fn ioprio_set_self(_class: i32, _level: i32) -> Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn prctl_set_name(_name: &str) -> Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn prctl_set_dumpable(_dumpable: bool) -> Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn prctl_set_pdeathsig(_sig: i32) -> Result<()> {
    Ok(())
}
