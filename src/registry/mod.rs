use bitflags::bitflags;

use crate::status::ExitCode;
use crate::workload::{self, WorkloadArgs};

#[cfg(test)]
mod test;

bitflags! {
    /// Stressor class bitmask. A stressor may belong to several classes;
    /// `--class` keeps every entry whose mask intersects the filter.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Class: u32 {
        const CPU = 1 << 0;
        const CPU_CACHE = 1 << 1;
        const DEVICE = 1 << 2;
        const FILESYSTEM = 1 << 3;
        const GPU = 1 << 4;
        const INTERRUPT = 1 << 5;
        const IO = 1 << 6;
        const MEMORY = 1 << 7;
        const NETWORK = 1 << 8;
        const OS = 1 << 9;
        const PIPE_IO = 1 << 10;
        const SCHEDULER = 1 << 11;
        const SECURITY = 1 << 12;
        const VM = 1 << 13;
        /// Workloads that may hang or destabilise the host. Gated behind
        /// `--pathological`.
        const PATHOLOGICAL = 1 << 14;
    }
}

pub const CLASS_NAMES: &[(&str, Class)] = &[
    ("cpu", Class::CPU),
    ("cpu-cache", Class::CPU_CACHE),
    ("device", Class::DEVICE),
    ("filesystem", Class::FILESYSTEM),
    ("gpu", Class::GPU),
    ("interrupt", Class::INTERRUPT),
    ("io", Class::IO),
    ("memory", Class::MEMORY),
    ("network", Class::NETWORK),
    ("os", Class::OS),
    ("pipe", Class::PIPE_IO),
    ("scheduler", Class::SCHEDULER),
    ("security", Class::SECURITY),
    ("vm", Class::VM),
    ("pathological", Class::PATHOLOGICAL),
];

impl Class {
    pub fn parse(name: &str) -> Option<Self> {
        let munged = munge(name);
        CLASS_NAMES
            .iter()
            .find(|(n, _)| munge(n) == munged)
            .map(|&(_, class)| class)
    }

    pub fn valid_names() -> String {
        CLASS_NAMES
            .iter()
            .map(|&(n, _)| n)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Whether a workload cross-checks its own data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyMode {
    /// No self-verification available.
    None,
    /// Verifies when `--verify` is given.
    Optional,
    /// Always verifies.
    Always,
}

pub type WorkloadFn = fn(&mut WorkloadArgs) -> ExitCode;

/// A named knob a stressor exposes; the CLI routes `--set OPT=VALUE`
/// through these before the fleet launches.
#[derive(Clone, Copy)]
pub struct OptSetter {
    pub opt: &'static str,
    pub set: fn(&str) -> std::result::Result<(), &'static str>,
}

/// Optional lifecycle hooks. `supported` runs at plan time and may veto
/// the stressor for this host; `init`/`deinit` bracket the whole run;
/// `set_default`/`set_limit` tune workload parameters before launch.
#[derive(Clone, Copy, Default)]
pub struct Hooks {
    pub supported: Option<fn() -> std::result::Result<(), &'static str>>,
    pub init: Option<fn()>,
    pub deinit: Option<fn()>,
    pub set_default: Option<fn()>,
    pub set_limit: Option<fn(u64)>,
}

/// Immutable stressor descriptor. Identity is `id`, never the table
/// position.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub id: u32,
    pub name: &'static str,
    pub class: Class,
    pub verify: VerifyMode,
    pub short_opt: Option<char>,
    pub hooks: Hooks,
    pub opt_setters: &'static [OptSetter],
    pub workload: WorkloadFn,
    pub help: &'static str,
}

/// Static catalog of every stressor built into the harness.
pub struct Registry {
    entries: Vec<Descriptor>,
}

/// Case-insensitive name with `_`/`-` treated as equal.
fn munge(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

impl Registry {
    pub fn builtin() -> Self {
        let entries = workload::catalog();
        debug_assert!({
            let mut ids: Vec<u32> = entries.iter().map(|d| d.id).collect();
            ids.sort_unstable();
            ids.windows(2).all(|w| w[0] != w[1])
        });
        Self { entries }
    }

    pub fn entries(&self) -> &[Descriptor] {
        &self.entries
    }

    pub fn by_id(&self, id: u32) -> Option<&Descriptor> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<(usize, &Descriptor)> {
        let munged = munge(name);
        self.entries
            .iter()
            .enumerate()
            .find(|(_, d)| munge(d.name) == munged)
    }

    pub fn valid_names(&self) -> String {
        self.entries
            .iter()
            .map(|d| d.name)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Stressor names belonging to a class, for `--class NAME?` listings.
    pub fn class_members(&self, class: Class) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|d| d.class.intersects(class))
            .map(|d| d.name)
            .collect()
    }
}
