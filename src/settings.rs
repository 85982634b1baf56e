use std::path::PathBuf;

/// Run configuration shared by the CLI and the library surface.
/// Selection inputs live in [`crate::plan::PlanInput`]; this is
/// everything else that shapes a run.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Wall-clock budget in seconds; `0` means no explicit deadline.
    pub timeout_secs: u32,
    /// Per-instance staggered start: instance k sleeps `k * backoff` µs.
    pub backoff_us: u64,
    /// Abort the whole fleet on the first qualifying worker failure.
    pub abort: bool,
    /// Churn child CPU affinities while waiting.
    pub aggressive: bool,
    pub verify: bool,
    pub metrics: bool,
    pub metrics_brief: bool,
    /// Keep the parent's name on workers instead of renaming them.
    pub keep_name: bool,
    pub keep_files: bool,
    pub seed: u64,
    pub yaml: Option<PathBuf>,
    pub temp_dir: PathBuf,
}

/// Sequential mode needs some deadline per entry or a single stuck
/// stressor blocks the walk forever.
pub const DEFAULT_SEQUENTIAL_TIMEOUT: u32 = 60;

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            backoff_us: 0,
            abort: false,
            aggressive: false,
            verify: false,
            metrics: false,
            metrics_brief: false,
            keep_name: false,
            keep_files: false,
            seed: 0,
            yaml: None,
            temp_dir: PathBuf::from("."),
        }
    }
}
