//! The fleet scheduler.
//!
//! Fans the run list out into worker processes under one of three
//! policies, then drives the wait/reap cycle. All three policies share
//! the same launch core: the parallel policy launches every runnable
//! entry at once, the sequential policy launches one entry at a time in
//! isolation, and the permute policy launches every non-empty subset of
//! the (clamped) runnable entries in turn.
//!
//! Per-instance life cycle:
//! `PLANNED -> SPAWNING -> RUNNING -> STOPPING -> EXITED -> REAPED`,
//! where STOPPING is entered through the alarm broadcast or an external
//! signal and REAPED only after the parent's `waitpid` has observed the
//! child.

use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::adapters;
use crate::error::Result;
use crate::ffi::{self, syscall};
use crate::plan::{RunList, StatusKind};
use crate::registry::{Registry, VerifyMode};
use crate::settings::{Settings, DEFAULT_SEQUENTIAL_TIMEOUT};
use crate::shared::SharedPlane;
use crate::signal;
use crate::status::ExitCode;
use crate::workload::WorkloadArgs;


/// Permute mode enumerates subsets of at most this many entries;
/// runnable entries beyond the clamp never permute.
pub const PERMUTE_MAX: usize = 16;

const FORK_RETRY: Duration = Duration::from_millis(100);
const REAP_POLL: Duration = Duration::from_millis(100);
/// Shutdown broadcasts repeat at this cadence until the fleet is gone.
const REBROADCAST_SECS: f64 = 1.0;

/// What the fleet learned across a whole run. `exit` carries the most
/// severe worker outcome; the flags refine the final report.
#[derive(Clone, Copy, Debug)]
pub struct FleetOutcome {
    pub exit: ExitCode,
    /// False on harness-level failures.
    pub success: bool,
    /// False once any worker ran out of resources.
    pub resource_success: bool,
    /// False once any worker's metrics cannot be trusted.
    pub metrics_success: bool,
    pub aborted: bool,
}

impl Default for FleetOutcome {
    fn default() -> Self {
        Self {
            exit: ExitCode::Success,
            success: true,
            resource_success: true,
            metrics_success: true,
            aborted: false,
        }
    }
}

#[derive(Clone, Copy)]
struct Launched {
    entry: usize,
    slot: usize,
    pid: i32,
    reaped: bool,
}

/// The entries picked out of `candidates` by the subset mask, in
/// candidate order.
fn subset(candidates: &[usize], mask: u32) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, &idx)| idx)
        .collect()
}

pub struct Fleet<'a> {
    registry: &'a Registry,
    plan: &'a mut RunList,
    shared: &'a SharedPlane,
    settings: &'a Settings,
    outcome: FleetOutcome,
    rng: SmallRng,
}

impl<'a> Fleet<'a> {
    pub fn new(
        registry: &'a Registry,
        plan: &'a mut RunList,
        shared: &'a SharedPlane,
        settings: &'a Settings,
    ) -> Self {
        let rng = SmallRng::seed_from_u64(settings.seed);
        Self {
            registry,
            plan,
            shared,
            settings,
            outcome: FleetOutcome::default(),
            rng,
        }
    }

    /// Assigns each runnable entry its slice of the shared stats arena.
    /// Stable across launches, so permute rounds accumulate into the
    /// same slots.
    fn assign_stats_ranges(&mut self) {
        let mut offset = 0usize;
        for entry in &mut self.plan.entries {
            if entry.runnable() {
                entry.stats_range = offset..offset + entry.num_instances as usize;
                offset += entry.num_instances as usize;
            } else {
                entry.stats_range = 0..0;
            }
        }
        debug_assert!(offset <= self.shared.capacity());
    }

    pub fn run_parallel(mut self) -> Result<FleetOutcome> {
        self.assign_stats_ranges();
        self.shared.header().time_started = ffi::now();
        let indices: Vec<usize> = (0..self.plan.entries.len())
            .filter(|&i| self.plan.entries[i].runnable())
            .collect();
        self.launch(&indices, self.settings.timeout_secs)?;
        Ok(self.outcome)
    }

    /// Walks the runnable entries one at a time; each entry runs all
    /// its instances in parallel while every other entry stays idle.
    pub fn run_sequential(mut self) -> Result<FleetOutcome> {
        self.assign_stats_ranges();
        self.shared.header().time_started = ffi::now();
        let timeout = match self.settings.timeout_secs {
            0 => DEFAULT_SEQUENTIAL_TIMEOUT,
            t => t,
        };
        for i in 0..self.plan.entries.len() {
            if !self.plan.entries[i].runnable() {
                continue;
            }
            if self.outcome.aborted || !signal::keep_running() {
                break;
            }
            self.launch(&[i], timeout)?;
        }
        Ok(self.outcome)
    }

    /// Runs every non-empty subset of the first [`PERMUTE_MAX`]
    /// runnable entries, in natural integer order of the subset mask.
    pub fn run_permute(mut self) -> Result<FleetOutcome> {
        self.assign_stats_ranges();
        self.shared.header().time_started = ffi::now();

        let runnable: Vec<usize> = (0..self.plan.entries.len())
            .filter(|&i| self.plan.entries[i].runnable())
            .collect();
        let k = runnable.len().min(PERMUTE_MAX);
        // Entries beyond the clamp sit out the whole permute phase.
        for &idx in &runnable[k..] {
            self.plan.entries[idx].ignore_permute = true;
        }

        let rounds = (1u32 << k) - 1;
        for mask in 1..=rounds {
            if self.outcome.aborted || !signal::keep_running() {
                break;
            }
            let members = subset(&runnable[..k], mask);
            for (bit, &idx) in runnable[..k].iter().enumerate() {
                self.plan.entries[idx].ignore_permute = mask & (1 << bit) == 0;
            }
            let names: Vec<&str> = members
                .iter()
                .map(|&idx| self.plan.entries[idx].name)
                .collect();
            info!("permute {}/{}: {}", mask, rounds, names.join(" "));
            self.launch(&members, self.settings.timeout_secs)?;
            for &idx in &runnable[..k] {
                self.plan.entries[idx].ignore_permute = false;
            }
        }
        for &idx in &runnable {
            self.plan.entries[idx].ignore_permute = false;
        }
        Ok(self.outcome)
    }

    /// The shared launch core: fork every instance of the given
    /// entries, arm the deadline, then wait and reap.
    fn launch(&mut self, indices: &[usize], timeout_secs: u32) -> Result<()> {
        signal::reset_broadcasts();
        // Each launch is its own wait cycle; a previous launch's
        // expired deadline must not read as shutdown-pending here.
        self.shared
            .header_atomics()
            .wait_active
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let mut fleet: Vec<Launched> = Vec::new();

        'fanout: for &i in indices {
            let entry = &self.plan.entries[i];
            if !entry.runnable() || entry.ignore_permute {
                continue;
            }
            let (num, range_start) = (entry.num_instances, entry.stats_range.start);
            for k in 0..num {
                if !signal::keep_running() {
                    break 'fanout;
                }
                let slot = range_start + k as usize;
                match self.spawn(i, k, slot, timeout_secs) {
                    Some(pid) => fleet.push(Launched {
                        entry: i,
                        slot,
                        pid,
                        reaped: false,
                    }),
                    // Fatal fork error: shut down and fall through to
                    // the reap of whatever was already started.
                    None => break 'fanout,
                }
            }
        }

        // The global deadline covers the whole fleet, armed only after
        // fan-out so slow staggered starts do not eat the budget.
        if timeout_secs > 0 {
            syscall::alarm(timeout_secs);
        }

        if self.settings.aggressive {
            self.churn_and_reap(&mut fleet);
        }
        self.reap_all(&mut fleet);

        syscall::alarm(0);
        Ok(())
    }

    /// Forks one worker. Returns its PID, or None on a fatal fork
    /// error (EAGAIN is retried for as long as the run is live).
    fn spawn(&mut self, entry_idx: usize, instance: u32, slot: usize, timeout_secs: u32) -> Option<i32> {
        // Reset the slot while the parent is still its only writer;
        // permute rounds reuse slots and a stale `signalled` latch
        // would hide the worker from the next shutdown broadcast.
        unsafe {
            let s = self.shared.slot_mut(slot);
            s.pid = 0;
            s.signalled = false;
            s.completed = false;
        }

        let pid = loop {
            match syscall::fork() {
                Ok(pid) => break pid,
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                    if !signal::keep_running() {
                        return None;
                    }
                    std::thread::sleep(FORK_RETRY);
                }
                Err(e) => {
                    error!("fork failed: {}", e);
                    self.outcome.success = false;
                    self.outcome.exit = self.outcome.exit.merge(ExitCode::Failure);
                    signal::stop_all();
                    signal::broadcast_shutdown();
                    return None;
                }
            }
        };

        let header = self.shared.header_atomics();
        if pid == 0 {
            // One past the parent's count at the moment of our fork.
            let stagger = header.started.load(std::sync::atomic::Ordering::Relaxed) as u64 + 1;
            self.child_run(entry_idx, instance, slot, stagger, timeout_secs);
        }

        // Parent side: record the child so broadcasts can reach it.
        unsafe {
            self.shared.slot_mut(slot).pid = pid;
        }
        header
            .started
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        adapters::ftrace_add_pid(pid);
        Some(pid)
    }

    fn child_run(&self, entry_idx: usize, instance: u32, slot_idx: usize, stagger: u64, timeout_secs: u32) -> ! {
        let entry = &self.plan.entries[entry_idx];
        let desc = &self.registry.entries()[entry.desc];
        let header = self.shared.header_atomics();

        if !self.settings.keep_name {
            let _ = syscall::prctl_set_name(desc.name);
        }
        let _ = syscall::prctl_set_dumpable(true);
        signal::install_child();
        let _ = syscall::ioprio_set_self(syscall::IOPRIO_CLASS_IDLE, 0);
        // If the parent dies we want to stop, not to keep stressing an
        // unsupervised machine.
        let _ = syscall::prctl_set_pdeathsig(libc::SIGALRM);

        if self.settings.backoff_us > 0 {
            std::thread::sleep(Duration::from_micros(self.settings.backoff_us * stagger));
        }

        let interrupts_before = adapters::interrupts_total();
        let pid = unsafe { libc::getpid() };
        let start = ffi::now();
        let time_end = match (timeout_secs, entry.ops_budget) {
            // No deadline and no ops budget would run forever; fall
            // back to a day, same order as the classic tools.
            (0, 0) => start + 86_400.0,
            (0, _) => f64::INFINITY,
            (t, _) => start + t as f64,
        };

        let slot = unsafe { self.shared.slot_mut(slot_idx) };
        let checksum = unsafe { self.shared.checksum_mut(slot_idx) };
        slot.pid = pid;
        slot.start = start;
        slot.ci.counter = 0;
        slot.ci.run_ok = false;
        slot.ci.counter_ready = false;
        slot.ci.force_killed = false;

        let status = {
            let (ci, metrics) = (&mut slot.ci, &mut slot.metrics);
            let mut args = WorkloadArgs {
                ci,
                name: desc.name,
                max_ops: entry.ops_budget,
                instance,
                num_instances: entry.num_instances,
                pid,
                page_size: self.shared.page_size(),
                time_end,
                sentinels: self.shared.sentinels(),
                metrics,
                mem_cache: header.mem_cache,
                verify: match desc.verify {
                    VerifyMode::Always => true,
                    VerifyMode::Optional => self.settings.verify,
                    VerifyMode::None => false,
                },
                keep_files: self.settings.keep_files,
                temp_dir: self.settings.temp_dir.clone(),
            };
            (desc.workload)(&mut args)
        };

        slot.completed = true;
        slot.duration = ffi::now() - start;
        slot.duration_total += slot.duration;
        slot.counter_total += slot.ci.counter;
        self.account_usage(slot);
        if let (Some(before), Some(after)) = (interrupts_before, adapters::interrupts_total()) {
            slot.interrupts = after.saturating_sub(before);
        }
        if let Some(temp) = adapters::thermal_max_milli() {
            slot.max_temp_milli = temp;
        }

        // Serialised through the shared log lock so lines from sibling
        // workers do not shear.
        self.shared.with_log_lock(|| {
            debug!(
                "{} [{}]: {} bogo-ops in {:.2}s",
                desc.name, pid, slot.ci.counter, slot.duration
            );
        });

        header
            .exited
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        // Last write before exit: the parent rehashes after reap.
        checksum.finalise(&slot.ci);
        unsafe { libc::_exit(status as i32) };
    }

    /// utime/stime from rusage (self + children), `times()` scaled by
    /// the tick rate as a fallback.
    fn account_usage(&self, slot: &mut crate::shared::StatsSlot) {
        let own = syscall::getrusage(libc::RUSAGE_SELF);
        let kids = syscall::getrusage(libc::RUSAGE_CHILDREN);
        match (own, kids) {
            (Ok(own), Ok(kids)) => {
                slot.utime = ffi::timeval_secs(&own.ru_utime) + ffi::timeval_secs(&kids.ru_utime);
                slot.stime = ffi::timeval_secs(&own.ru_stime) + ffi::timeval_secs(&kids.ru_stime);
                slot.maxrss_kb = slot.maxrss_kb.max(own.ru_maxrss).max(kids.ru_maxrss);
            }
            _ => {
                if let Ok(tms) = syscall::times() {
                    let ticks = ffi::ticks_per_sec() as f64;
                    slot.utime = (tms.tms_utime + tms.tms_cutime) as f64 / ticks;
                    slot.stime = (tms.tms_stime + tms.tms_cstime) as f64 / ticks;
                }
            }
        }
        slot.utime_total += slot.utime;
        slot.stime_total += slot.stime;
    }

    /// Reaps every launched instance. Polls rather than blocking per
    /// child: once shutdown is pending (deadline fired, interrupt,
    /// abort), the broadcast is repeated every second so the
    /// escalation counter keeps advancing and a worker that ignores
    /// ALRM is KILLed after five rounds instead of hanging the reap.
    fn reap_all(&mut self, fleet: &mut [Launched]) {
        let mut last_broadcast = ffi::now();
        loop {
            let mut live = 0usize;
            for i in 0..fleet.len() {
                if fleet[i].reaped {
                    continue;
                }
                match syscall::waitpid(fleet[i].pid, libc::WNOHANG) {
                    Ok((0, _)) => live += 1,
                    Ok((_, status)) => self.account_reaped(i, fleet, Some(status)),
                    Err(e) if e.raw_os_error() == Some(libc::EINTR) => live += 1,
                    Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                        self.account_reaped(i, fleet, None)
                    }
                    Err(e) => {
                        error!("waitpid({}) failed: {}", fleet[i].pid, e);
                        self.account_reaped(i, fleet, None);
                    }
                }
            }
            if live == 0 {
                return;
            }

            let stopping = !signal::keep_running()
                || !self
                    .shared
                    .header_atomics()
                    .wait_active
                    .load(std::sync::atomic::Ordering::Relaxed);
            if stopping && ffi::now() - last_broadcast >= REBROADCAST_SECS {
                signal::broadcast_shutdown();
                last_broadcast = ffi::now();
            }
            std::thread::sleep(REAP_POLL);
        }
    }

    /// Aggressive wait: poll with WNOHANG and keep rebinding every live
    /// child to a random CPU from the parent's own mask. Exits once no
    /// child remains alive (or the deadline released the wait).
    fn churn_and_reap(&mut self, fleet: &mut Vec<Launched>) {
        #[cfg(target_os = "linux")]
        let cpus: Vec<usize> = match syscall::sched_getaffinity(0) {
            Ok(set) => (0..libc::CPU_SETSIZE as usize)
                .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
                .collect(),
            Err(_) => Vec::new(),
        };
        #[cfg(not(target_os = "linux"))]
        let cpus: Vec<usize> = Vec::new();

        if cpus.is_empty() {
            debug!("affinity control unavailable, aggressive churn is a no-op");
        }

        let interval = Duration::from_micros(1_000_000 / (5 * ffi::ticks_per_sec() as u64));
        let header = self.shared.header_atomics();

        loop {
            if !header.wait_active.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            let mut live = 0usize;
            for i in 0..fleet.len() {
                if fleet[i].reaped {
                    continue;
                }
                match syscall::waitpid(fleet[i].pid, libc::WNOHANG) {
                    Ok((0, _)) => {
                        live += 1;
                        #[cfg(target_os = "linux")]
                        if !cpus.is_empty() {
                            let cpu = cpus[self.rng.gen_range(0..cpus.len())];
                            let mut set = unsafe { std::mem::zeroed::<libc::cpu_set_t>() };
                            unsafe { libc::CPU_SET(cpu, &mut set) };
                            let _ = syscall::sched_setaffinity(fleet[i].pid, &set);
                        }
                    }
                    Ok((_, status)) => self.account_reaped(i, fleet, Some(status)),
                    Err(e) if e.raw_os_error() == Some(libc::EINTR) => live += 1,
                    Err(_) => self.account_reaped(i, fleet, None),
                }
            }
            if live == 0 {
                return;
            }
            std::thread::sleep(interval);
        }
    }

    /// Decodes one reaped instance into entry tallies and the fleet
    /// outcome, then releases its slot for parent reads.
    fn account_reaped(&mut self, idx: usize, fleet: &mut [Launched], status: Option<i32>) {
        let Launched {
            entry: entry_idx,
            slot: slot_idx,
            pid,
            ..
        } = fleet[idx];
        fleet[idx].reaped = true;

        let header = self.shared.header_atomics();
        header
            .reaped
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Safe: the child is reaped (or lost to ECHILD), nobody else
        // writes this slot anymore.
        let slot = unsafe { self.shared.slot_mut(slot_idx) };
        // A negative pid marks the slot reaped so the shutdown
        // broadcast stops targeting it (PIDs get reused).
        slot.pid = -pid;
        if slot.completed {
            self.plan.entries[entry_idx].completed += 1;
        }
        let force_killed = slot.ci.force_killed;

        let Some(status) = status else {
            return;
        };

        let name = self.plan.entries[entry_idx].name;
        if libc::WIFEXITED(status) {
            let code = ExitCode::from_raw(libc::WEXITSTATUS(status));
            self.outcome.exit = self.outcome.exit.merge(code);
            match code {
                ExitCode::Success => {
                    self.plan.entries[entry_idx].bump_status(StatusKind::Passed)
                }
                ExitCode::NoResource => {
                    warn!("{} [{}]: out of resources, skipping", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::Skipped);
                    self.outcome.resource_success = false;
                    self.abort_fleet();
                }
                ExitCode::NotImplemented => {
                    warn!("{} [{}]: not implemented on this system", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::Skipped);
                    self.abort_fleet();
                }
                ExitCode::Signaled => self.abort_fleet(),
                ExitCode::BySysExit => {
                    warn!("{} [{}]: left via exit() without returning a status", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::Failed);
                    header
                        .failed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    self.abort_fleet();
                }
                ExitCode::MetricsUntrustworthy => {
                    warn!("{} [{}]: metrics untrustworthy", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::BadMetrics);
                    self.outcome.metrics_success = false;
                }
                ExitCode::NotSuccess => {
                    warn!("{} [{}]: stressor failed", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::Failed);
                    header
                        .failed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    self.abort_fleet();
                }
                ExitCode::Failure => {
                    error!("{} [{}]: harness failure in worker", name, pid);
                    self.plan.entries[entry_idx].bump_status(StatusKind::Failed);
                    header
                        .failed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    self.outcome.success = false;
                    self.abort_fleet();
                }
            }
        } else if libc::WIFSIGNALED(status) {
            let sig = libc::WTERMSIG(status);
            if sig == libc::SIGKILL && adapters::oom_killed(pid) {
                // The kernel picked a victim; not the workload's fault.
                info!("{} [{}]: killed by the OOM killer", name, pid);
                self.plan.entries[entry_idx].bump_status(StatusKind::Skipped);
            } else if sig == libc::SIGALRM {
                debug!("{} [{}]: terminated by the deadline alarm", name, pid);
                self.plan.entries[entry_idx].bump_status(StatusKind::Passed);
            } else {
                warn!("{} [{}]: killed by signal {}", name, pid, sig);
                self.plan.entries[entry_idx].bump_status(StatusKind::Failed);
                header
                    .failed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.outcome.exit = self.outcome.exit.merge(ExitCode::Signaled);
                self.abort_fleet();
            }
        }

        if force_killed {
            self.outcome.metrics_success = false;
        }
    }

    fn abort_fleet(&mut self) {
        if self.settings.abort && !self.outcome.aborted {
            info!("aborting remaining workers (--abort)");
            self.outcome.aborted = true;
            signal::stop_all();
            signal::broadcast_shutdown();
        }
    }
}
