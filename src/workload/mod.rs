//! The stressor module interface and the built-in workload catalog.
//!
//! The orchestrator sees every workload through [`WorkloadArgs`] and the
//! descriptor table; nothing in the core depends on what a body
//! actually stresses. Bodies run inside a forked worker, mutate only
//! their own counter block and metrics slice, and must poll
//! [`WorkloadArgs::keep_going`] often enough to honour shutdown.

use std::path::PathBuf;

use crate::ffi;
use crate::registry::Descriptor;
use crate::shared::{AuxMetric, CounterInfo, MemCache, Sentinels};
use crate::signal;

mod cache;
mod cpu;
mod forker;
mod hdd;
mod memcpy;
mod pipe;
mod udp;
mod vm;
mod yields;

/// Everything a worker needs, assembled at fork time. `ci` and
/// `metrics` point into the worker's own shared stats slot.
pub struct WorkloadArgs<'a> {
    pub ci: &'a mut CounterInfo,
    pub name: &'static str,
    /// Bogo-ops budget; `0` runs to the deadline.
    pub max_ops: u64,
    pub instance: u32,
    pub num_instances: u32,
    pub pid: i32,
    pub page_size: usize,
    /// Monotonic deadline, see [`ffi::now`].
    pub time_end: f64,
    pub sentinels: Sentinels,
    pub metrics: &'a mut [AuxMetric],
    pub mem_cache: MemCache,
    pub verify: bool,
    pub keep_files: bool,
    pub temp_dir: PathBuf,
}

impl WorkloadArgs<'_> {
    /// The workload check-point: deadline, ops budget and both continue
    /// flags. Bodies call this once per bounded chunk of work.
    pub fn keep_going(&self) -> bool {
        if !signal::keep_running() {
            return false;
        }
        if self.max_ops != 0 && self.ci.counter >= self.max_ops {
            return false;
        }
        ffi::now() < self.time_end
    }

    pub fn bump(&mut self) {
        self.ci.counter += 1;
    }

    /// Publishes a named metric; dropped when all metric slots are
    /// taken.
    pub fn add_metric(&mut self, desc: &str, value: f64) {
        if let Some(slot) = self.metrics.iter_mut().find(|m| !m.is_set()) {
            slot.set(desc, value);
        }
    }
}

/// The built-in catalog, in stable id order.
pub fn catalog() -> Vec<Descriptor> {
    vec![
        cpu::descriptor(),
        cache::descriptor(),
        memcpy::descriptor(),
        vm::descriptor(),
        pipe::descriptor(),
        hdd::descriptor(),
        udp::descriptor(),
        yields::descriptor(),
        forker::descriptor(),
    ]
}

#[cfg(test)]
mod test {
    use std::ptr::null_mut;

    use super::WorkloadArgs;
    use crate::shared::{AuxMetric, CounterInfo, MemCache, Sentinels, AUX_METRICS_MAX};

    fn args<'a>(
        ci: &'a mut CounterInfo,
        metrics: &'a mut [AuxMetric],
        max_ops: u64,
    ) -> WorkloadArgs<'a> {
        WorkloadArgs {
            ci,
            name: "test",
            max_ops,
            instance: 0,
            num_instances: 1,
            pid: 1,
            page_size: 4096,
            time_end: crate::ffi::now() + 60.0,
            sentinels: Sentinels {
                none: null_mut(),
                ro: null_mut(),
                wo: null_mut(),
            },
            metrics,
            mem_cache: MemCache::default(),
            verify: false,
            keep_files: false,
            temp_dir: ".".into(),
        }
    }

    #[test]
    fn ops_budget_gates_the_checkpoint() {
        let mut ci = CounterInfo {
            counter: 0,
            run_ok: false,
            counter_ready: false,
            force_killed: false,
        };
        let mut metrics = [AuxMetric::default(); AUX_METRICS_MAX];
        let mut args = args(&mut ci, &mut metrics, 3);
        while args.keep_going() {
            args.bump();
        }
        assert_eq!(args.ci.counter, 3);
    }

    #[test]
    fn metrics_fill_up_and_then_drop() {
        let mut ci = CounterInfo {
            counter: 0,
            run_ok: false,
            counter_ready: false,
            force_killed: false,
        };
        let mut metrics = [AuxMetric::default(); AUX_METRICS_MAX];
        let mut args = args(&mut ci, &mut metrics, 0);
        for i in 0..AUX_METRICS_MAX + 2 {
            args.add_metric(&format!("metric {}", i), i as f64);
        }
        let set: Vec<_> = args.metrics.iter().filter(|m| m.is_set()).collect();
        assert_eq!(set.len(), AUX_METRICS_MAX);
        assert_eq!(set[0].description(), "metric 0");
    }
}
