//! The run-plan builder.
//!
//! Turns selection inputs into an ordered run list of
//! (stressor, instance-count, ops-budget) rows. The list keeps
//! deselected rows around with zero instances so later passes (class
//! listings, summaries) still see the whole picture; only rows that are
//! not ignored and have a nonzero count ever fork workers.

use std::ops::Range;

use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::ffi;
use crate::registry::{Class, Registry};

#[cfg(test)]
mod test;

/// How the fleet is scheduled and which stressors join it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Only explicitly mentioned stressors, all at once.
    ExplicitOnly,
    /// Every selected stressor at once, N instances each.
    Parallel(i32),
    /// One entry at a time, N instances of it in parallel.
    Sequential(i32),
    /// Every non-empty subset of the selected entries, in turn.
    Permute(i32),
    /// N instances drawn uniformly at random from the catalog.
    Random(u32),
}

#[derive(Clone, Debug)]
pub struct ExplicitEntry {
    pub name: String,
    pub instances: i32,
    pub ops: u64,
}

pub struct PlanInput {
    pub explicit: Vec<ExplicitEntry>,
    pub class_filter: Option<Class>,
    pub mode: Mode,
    pub with: Vec<String>,
    pub exclude: Vec<String>,
    pub allow_pathological: bool,
    /// Default per-instance bogo-ops budget; `0` runs to the deadline.
    pub default_ops: u64,
    pub seed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreRun {
    NotIgnored,
    Unsupported,
    Excluded,
}

/// Terminal per-instance outcomes tallied on the owning entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Passed = 0,
    Skipped = 1,
    Failed = 2,
    BadMetrics = 3,
}

pub const STATUS_KINDS: [StatusKind; 4] = [
    StatusKind::Passed,
    StatusKind::Skipped,
    StatusKind::Failed,
    StatusKind::BadMetrics,
];

/// One row of the run list: a stressor at a chosen multiplicity.
#[derive(Clone, Debug)]
pub struct RunEntry {
    /// Index into the registry's entry table.
    pub desc: usize,
    pub name: &'static str,
    pub num_instances: u32,
    pub ops_budget: u64,
    pub ignore_run: IgnoreRun,
    /// Skips the current permutation only.
    pub ignore_permute: bool,
    /// This entry's slots in the shared stats arena, assigned at launch.
    pub stats_range: Range<usize>,
    pub status: [u32; 4],
    pub completed: u32,
}

impl RunEntry {
    fn new(desc: usize, name: &'static str, num_instances: u32, ops_budget: u64) -> Self {
        Self {
            desc,
            name,
            num_instances,
            ops_budget,
            ignore_run: IgnoreRun::NotIgnored,
            ignore_permute: false,
            stats_range: 0..0,
            status: [0; 4],
            completed: 0,
        }
    }

    pub fn runnable(&self) -> bool {
        self.ignore_run == IgnoreRun::NotIgnored && self.num_instances > 0
    }

    pub fn bump_status(&mut self, kind: StatusKind) {
        self.status[kind as usize] += 1;
    }

    pub fn status_count(&self, kind: StatusKind) -> u32 {
        self.status[kind as usize]
    }
}

pub struct RunList {
    pub entries: Vec<RunEntry>,
}

impl RunList {
    pub fn runnable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.runnable()).count()
    }

    /// Total worker instances a launch of the whole list would fork.
    pub fn total_instances(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.runnable())
            .map(|e| e.num_instances as usize)
            .sum()
    }

    /// True when nothing is runnable purely because of `supported()`
    /// vetoes, which is a success condition rather than a plan error.
    pub fn idled_by_unsupported_only(&self) -> bool {
        let mut any = false;
        for entry in &self.entries {
            if entry.num_instances == 0 {
                continue;
            }
            match entry.ignore_run {
                IgnoreRun::Unsupported => any = true,
                IgnoreRun::NotIgnored | IgnoreRun::Excluded => return false,
            }
        }
        any
    }
}

/// Count conventions: `0` means "configured CPUs", negative means
/// "online CPUs".
fn resolve_instances(count: i32) -> u32 {
    match count {
        0 => ffi::cpus_configured(),
        n if n < 0 => ffi::cpus_online(),
        n => n as u32,
    }
}

fn lookup(registry: &Registry, name: &str) -> Result<usize> {
    registry
        .by_name(name)
        .map(|(idx, _)| idx)
        .ok_or_else(|| Error::UnknownStressor {
            name: name.to_string(),
            valid: registry.valid_names(),
        })
}

/// Builds the run list. The rules apply in a fixed order, so identical
/// inputs and seed always produce an identical list.
pub fn build(registry: &Registry, input: &PlanInput) -> Result<RunList> {
    if input.class_filter.is_some() && input.mode == Mode::ExplicitOnly {
        return Err(Error::ClassWithoutMode);
    }

    let mut entries: Vec<RunEntry> = Vec::new();

    // Seed from explicit mentions, in mention order.
    for mention in &input.explicit {
        let desc = lookup(registry, &mention.name)?;
        let name = registry.entries()[desc].name;
        let ops = if mention.ops != 0 {
            mention.ops
        } else {
            input.default_ops
        };
        match entries.iter_mut().find(|e| e.desc == desc) {
            Some(entry) => entry.num_instances += resolve_instances(mention.instances),
            None => entries.push(RunEntry::new(
                desc,
                name,
                resolve_instances(mention.instances),
                ops,
            )),
        }
    }

    match input.mode {
        Mode::ExplicitOnly => (),
        Mode::Random(n) => {
            if !entries.is_empty() {
                return Err(Error::RandomWithExplicit);
            }
            for (desc, d) in registry.entries().iter().enumerate() {
                entries.push(RunEntry::new(desc, d.name, 0, input.default_ops));
            }
            let mut rng = SmallRng::seed_from_u64(input.seed);
            for _ in 0..n {
                let pick = rng.gen_range(0..entries.len());
                entries[pick].num_instances += 1;
            }
        }
        Mode::Parallel(count) | Mode::Sequential(count) | Mode::Permute(count) => {
            let count = resolve_instances(count);
            if input.with.is_empty() {
                for (desc, d) in registry.entries().iter().enumerate() {
                    match entries.iter_mut().find(|e| e.desc == desc) {
                        Some(_) => (),
                        None => entries.push(RunEntry::new(desc, d.name, count, input.default_ops)),
                    }
                }
            } else {
                for name in &input.with {
                    let desc = lookup(registry, name)?;
                    let reg_name = registry.entries()[desc].name;
                    match entries.iter_mut().find(|e| e.desc == desc) {
                        Some(entry) => entry.num_instances = count,
                        None => {
                            entries.push(RunEntry::new(desc, reg_name, count, input.default_ops))
                        }
                    }
                }
            }
        }
    }

    // Class filter: deselected rows stay in the list at zero instances.
    if let Some(filter) = input.class_filter {
        for entry in &mut entries {
            if !registry.entries()[entry.desc].class.intersects(filter) {
                entry.num_instances = 0;
            }
        }
    }

    for entry in &mut entries {
        if let Some(supported) = registry.entries()[entry.desc].hooks.supported {
            if let Err(reason) = supported() {
                warn!("{}: not supported on this system: {}", entry.name, reason);
                entry.ignore_run = IgnoreRun::Unsupported;
            }
        }
    }

    if !input.allow_pathological {
        for entry in &mut entries {
            let class = registry.entries()[entry.desc].class;
            if class.contains(Class::PATHOLOGICAL) && entry.num_instances > 0 {
                info!(
                    "{}: pathological stressor skipped, rerun with --pathological to enable",
                    entry.name
                );
                entry.ignore_run = IgnoreRun::Excluded;
            }
        }
    }

    for name in &input.exclude {
        let desc = lookup(registry, name)?;
        for entry in &mut entries {
            if entry.desc == desc {
                entry.ignore_run = IgnoreRun::Excluded;
            }
        }
    }

    Ok(RunList { entries })
}
