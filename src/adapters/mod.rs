//! Thin facades over external collaborators.
//!
//! Everything here is best-effort: each facade degrades to a no-op (or
//! `None`) when the backing kernel interface is absent, and nothing in
//! the orchestrator core depends on any of them succeeding.

use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::shared::MemCache;

/// System-wide interrupt count, for per-worker interrupt deltas.
pub fn interrupts_total() -> Option<u64> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    let line = stat.lines().find(|l| l.starts_with("intr "))?;
    line.split_ascii_whitespace().nth(1)?.parse().ok()
}

/// Hottest thermal zone in milli-degrees C.
pub fn thermal_max_milli() -> Option<i32> {
    let zones = fs::read_dir("/sys/class/thermal").ok()?;
    zones
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| fs::read_to_string(e.path().join("temp")).ok())
        .filter_map(|s| s.trim().parse::<i32>().ok())
        .max()
}

const FTRACE_PID_FILES: &[&str] = &[
    "/sys/kernel/tracing/set_event_pid",
    "/sys/kernel/debug/tracing/set_event_pid",
];

/// Registers a worker PID with ftrace event filtering. The PID list
/// is append-only; truncating it would drop the PIDs of siblings.
pub fn ftrace_add_pid(pid: i32) {
    use std::io::Write;

    for path in FTRACE_PID_FILES {
        if Path::new(path).exists() {
            let _ = fs::OpenOptions::new()
                .append(true)
                .open(path)
                .and_then(|mut f| f.write_all(format!("{}\n", pid).as_bytes()));
            return;
        }
    }
}

/// Clears the ftrace PID filter at the end of the run.
pub fn ftrace_stop() {
    for path in FTRACE_PID_FILES {
        if Path::new(path).exists() {
            let _ = fs::write(path, "");
            return;
        }
    }
}

/// Scans the kernel log ring for an oom-kill record naming `pid`.
/// This is the adjudicator that keeps OOM kills out of the failure
/// tally: the kernel chose the victim, the workload did nothing wrong.
pub fn oom_killed(pid: i32) -> bool {
    use std::os::unix::fs::OpenOptionsExt;

    let file = fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open("/dev/kmsg");
    let mut file = match file {
        Ok(file) => file,
        Err(_) => return false,
    };

    let needle_a = format!("Killed process {} ", pid);
    let needle_b = format!("oom-kill:{}", pid);
    // One read per record; EAGAIN means the ring is drained.
    let mut record = [0u8; 8192];
    loop {
        match file.read(&mut record) {
            Ok(0) => return false,
            Ok(n) => {
                let text = String::from_utf8_lossy(&record[..n]);
                if text.contains(&needle_a) || text.contains(&needle_b) {
                    return true;
                }
            }
            Err(_) => return false,
        }
    }
}

/// Logs a handful of memory-pressure counters, before and after a run.
pub fn vmstat_log(tag: &str) {
    let Ok(vmstat) = fs::read_to_string("/proc/vmstat") else {
        return;
    };
    let mut picks = Vec::new();
    for line in vmstat.lines() {
        if let Some((key, val)) = line.split_once(' ') {
            if matches!(key, "pgfault" | "pgmajfault" | "pswpin" | "pswpout" | "oom_kill") {
                picks.push(format!("{} {}", key, val));
            }
        }
    }
    if !picks.is_empty() {
        debug!("vmstat {}: {}", tag, picks.join(", "));
    }
}

pub fn clocksource_log() {
    let path = "/sys/devices/system/clocksource/clocksource0/current_clocksource";
    if let Ok(src) = fs::read_to_string(path) {
        debug!("clocksource: {}", src.trim());
    }
}

pub fn cpuidle_log() {
    let Ok(states) = fs::read_dir("/sys/devices/system/cpu/cpu0/cpuidle") else {
        return;
    };
    let names: Vec<String> = states
        .flatten()
        .filter_map(|e| fs::read_to_string(e.path().join("name")).ok())
        .map(|s| s.trim().to_string())
        .collect();
    if !names.is_empty() {
        debug!("cpuidle states: {}", names.join(" "));
    }
}

pub fn smart_log() {
    // Real SMART polling needs raw device ioctls and root; report the
    // block devices we would watch and leave it at that.
    let Ok(blocks) = fs::read_dir("/sys/block") else {
        return;
    };
    let names: Vec<String> = blocks
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with("loop") && !n.starts_with("ram"))
        .collect();
    if !names.is_empty() {
        debug!("block devices (SMART not polled): {}", names.join(" "));
    }
}

const KSM_RUN: &str = "/sys/kernel/mm/ksm/run";

/// Turns kernel samepage merging on for the run; returns the previous
/// setting for [`ksm_restore`].
pub fn ksm_enable() -> Option<String> {
    let previous = fs::read_to_string(KSM_RUN).ok()?;
    fs::write(KSM_RUN, "1").ok()?;
    Some(previous.trim().to_string())
}

pub fn ksm_restore(previous: Option<String>) {
    if let Some(previous) = previous {
        let _ = fs::write(KSM_RUN, previous);
    }
}

/// Makes the parent an unattractive OOM victim so the harness survives
/// to report on workers the kernel kills instead.
pub fn oom_avoid_self() {
    let _ = fs::write("/proc/self/oom_score_adj", "-600");
}

/// Page-out pressure on other processes ("thrash" mode) needs
/// CAP_SYS_ADMIN writes under /proc/<pid>; declared unavailable here.
pub fn thrash_start() {
    debug!("thrash: not available, skipping");
}

pub fn thrash_stop() {}

/// Cache geometry of the largest data cache reported by sysfs.
pub fn mem_cache_geometry() -> MemCache {
    let mut best = MemCache::default();
    let Ok(indexes) = fs::read_dir("/sys/devices/system/cpu/cpu0/cache") else {
        return best;
    };
    for entry in indexes.flatten() {
        let path = entry.path();
        let level: u32 = match fs::read_to_string(path.join("level")) {
            Ok(s) => s.trim().parse().unwrap_or(0),
            Err(_) => continue,
        };
        let size = fs::read_to_string(path.join("size"))
            .ok()
            .and_then(|s| parse_cache_size(s.trim()));
        let ways: u32 = fs::read_to_string(path.join("ways_of_associativity"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        if let Some(size) = size {
            if level >= best.level {
                best = MemCache { size, level, ways };
            }
        }
    }
    best
}

// "32K", "1024K", "8M" as reported by sysfs.
fn parse_cache_size(text: &str) -> Option<u64> {
    if let Some(kb) = text.strip_suffix('K') {
        return kb.parse::<u64>().ok().map(|v| v * 1024);
    }
    if let Some(mb) = text.strip_suffix('M') {
        return mb.parse::<u64>().ok().map(|v| v * 1024 * 1024);
    }
    text.parse().ok()
}

#[cfg(test)]
mod test {
    use super::parse_cache_size;

    #[test]
    fn cache_size_suffixes() {
        assert_eq!(parse_cache_size("32K"), Some(32 * 1024));
        assert_eq!(parse_cache_size("8M"), Some(8 * 1024 * 1024));
        assert_eq!(parse_cache_size("512"), Some(512));
        assert_eq!(parse_cache_size("bogus"), None);
    }
}
