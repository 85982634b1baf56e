pub mod syscall;

/// Monotonic wall clock in fractional seconds. Deadlines computed in the
/// parent stay meaningful in forked children since the clock is
/// process-independent. Falls back to zero if the clock is broken, which
/// makes every deadline appear already reached.
pub fn now() -> f64 {
    match syscall::clock_gettime(libc::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9,
        Err(_) => 0.0,
    }
}

pub fn page_size() -> usize {
    match syscall::sysconf(libc::_SC_PAGESIZE) {
        Ok(size) if size > 0 => size as _,
        _ => 4096,
    }
}

pub fn ticks_per_sec() -> i64 {
    match syscall::sysconf(libc::_SC_CLK_TCK) {
        Ok(ticks) if ticks > 0 => ticks,
        _ => 100,
    }
}

pub fn cpus_configured() -> u32 {
    match syscall::sysconf(libc::_SC_NPROCESSORS_CONF) {
        Ok(n) if n > 0 => n as _,
        _ => 1,
    }
}

pub fn cpus_online() -> u32 {
    match syscall::sysconf(libc::_SC_NPROCESSORS_ONLN) {
        Ok(n) if n > 0 => n as _,
        _ => 1,
    }
}

pub fn round_up_page(len: usize, page: usize) -> usize {
    len.div_ceil(page) * page
}

pub fn timeval_secs(tv: &libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6
}
