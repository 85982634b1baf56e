//! Process-fleet stress-testing harness for Unix-like systems.
//!
//! Given a catalog of workload modules ("stressors"), the harness forks
//! a fleet of worker processes that hammer OS subsystems under a
//! wall-clock budget, then aggregates per-worker bogo-op counters,
//! resource usage and validation hashes into a final report.
//!
//! ## Example
//!
//! Run two `cpu` workers and one `memcpy` worker for a second and
//! collect their metrics:
//!
//! ```rust,no_run
//! use brunt::fleet::Fleet;
//! use brunt::plan::{ExplicitEntry, Mode, PlanInput};
//! use brunt::registry::Registry;
//! use brunt::settings::Settings;
//! use brunt::shared::SharedPlane;
//!
//! let registry = Registry::builtin();
//! let input = PlanInput {
//!     explicit: vec![
//!         ExplicitEntry { name: "cpu".into(), instances: 2, ops: 0 },
//!         ExplicitEntry { name: "memcpy".into(), instances: 1, ops: 0 },
//!     ],
//!     class_filter: None,
//!     mode: Mode::ExplicitOnly,
//!     with: vec![],
//!     exclude: vec![],
//!     allow_pathological: false,
//!     default_ops: 0,
//!     seed: 0,
//! };
//! let mut plan = brunt::plan::build(&registry, &input).unwrap();
//!
//! let settings = Settings { timeout_secs: 1, ..Settings::default() };
//! let shared = SharedPlane::new(plan.total_instances()).unwrap();
//! brunt::signal::publish(&shared);
//! brunt::signal::install_parent().unwrap();
//!
//! let outcome = Fleet::new(&registry, &mut plan, &shared, &settings)
//!     .run_parallel()
//!     .unwrap();
//! let reports = brunt::metrics::aggregate(&plan, &shared);
//! for report in &reports {
//!     println!("{}: {} bogo-ops", report.name, report.bogo_ops);
//! }
//! assert!(outcome.success);
//! brunt::signal::uninstall();
//! ```
//!
//! The orchestrator needs `fork`, POSIX signals, anonymous shared
//! mappings and `waitpid`; affinity churn and I/O priorities are
//! Linux-only and degrade to no-ops elsewhere.

pub mod adapters;
mod error;
mod ffi;
pub mod fleet;
pub mod metrics;
pub mod plan;
pub mod registry;
pub mod report;
pub mod settings;
pub mod shared;
pub mod signal;
mod status;
pub mod workload;

pub use error::{Error, Result};
/// The monotonic clock the whole harness runs on.
pub use ffi::now;
pub use status::ExitCode;
