use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, warn, LevelFilter};

use brunt::adapters;
use brunt::fleet::{Fleet, FleetOutcome};
use brunt::metrics;
use brunt::plan::{self, ExplicitEntry, Mode, PlanInput, RunList};
use brunt::registry::{Class, Registry};
use brunt::report;
use brunt::settings::Settings;
use brunt::shared::SharedPlane;
use brunt::signal;
use brunt::{Error, ExitCode, Result};

/// Process-fleet stress-testing harness.
#[derive(Parser, Debug)]
#[command(name = "brunt", disable_version_flag = true)]
struct Cli {
    /// Run every stressor in parallel, N instances each (0 = one per
    /// configured CPU, negative = one per online CPU).
    #[arg(short = 'a', long, value_name = "N", allow_negative_numbers = true)]
    all: Option<i32>,

    /// Run stressors one at a time, N instances of each.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    sequential: Option<i32>,

    /// Run every non-empty subset of the selected stressors, N
    /// instances each.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    permute: Option<i32>,

    /// Run N instances drawn at random from the whole catalog.
    #[arg(long, value_name = "N")]
    random: Option<u32>,

    /// Select a stressor with an instance count: NAME[:N[:OPS]].
    #[arg(short = 's', long = "stressor", value_name = "NAME[:N[:OPS]]")]
    stressor: Vec<String>,

    /// Restrict --all/--sequential/--permute to these stressors.
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    with: Vec<String>,

    /// Keep only stressors of these classes; a trailing `?` lists the
    /// class members and exits.
    #[arg(long = "class", value_name = "LIST", value_delimiter = ',')]
    class: Vec<String>,

    /// Never run these stressors.
    #[arg(short = 'x', long, value_name = "LIST", value_delimiter = ',')]
    exclude: Vec<String>,

    /// List every stressor in the catalog and exit.
    #[arg(long)]
    stressors: bool,

    /// Tune a stressor option, e.g. --set hdd-blocks=64.
    #[arg(long = "set", value_name = "OPT=VALUE")]
    set: Vec<String>,

    /// Wall-clock budget in seconds (0 = no explicit deadline).
    #[arg(short = 't', long, value_name = "SECS", default_value_t = 0)]
    timeout: u32,

    /// Default per-instance bogo-ops budget (0 = run to the deadline).
    #[arg(long, value_name = "OPS", default_value_t = 0)]
    ops: u64,

    /// Stagger worker starts by N microseconds per already-started
    /// instance.
    #[arg(short = 'b', long, value_name = "USECS", default_value_t = 0)]
    backoff: u64,

    /// Abort the whole run on the first worker failure.
    #[arg(long)]
    abort: bool,

    /// Churn worker CPU affinities while waiting (Linux only).
    #[arg(long)]
    aggressive: bool,

    /// Print the metrics table at the end of the run.
    #[arg(short = 'M', long)]
    metrics: bool,

    /// Like --metrics, without the auxiliary metrics.
    #[arg(long)]
    metrics_brief: bool,

    /// Ask workloads to verify their own data where they can.
    #[arg(short = 'V', long)]
    verify: bool,

    /// Allow stressors of the pathological class.
    #[arg(long)]
    pathological: bool,

    /// Seed for every randomised decision in the run.
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Use a fixed seed instead of a fresh random one.
    #[arg(long)]
    no_rand_seed: bool,

    /// Keep the scratch files workloads leave in the temp dir.
    #[arg(long)]
    keep_files: bool,

    /// Keep the parent's process name on workers.
    #[arg(long)]
    keep_name: bool,

    /// Write the YAML report here.
    #[arg(long, value_name = "FILE")]
    yaml: Option<PathBuf>,

    /// Read additional options from a job file.
    #[arg(short = 'j', long, value_name = "FILE")]
    job: Option<PathBuf>,

    /// Directory for workload scratch files.
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// More logging (debug level).
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Less logging (errors only).
    #[arg(short = 'q', long)]
    quiet: bool,
}

/// Splices job-file tokens into the argument vector in place of the
/// `--job FILE` option. `#` starts a comment that runs to end of line.
fn expand_job_args(args: Vec<String>) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let path = if arg == "--job" || arg == "-j" {
            match iter.next() {
                Some(path) => path,
                None => {
                    out.push(arg);
                    continue;
                }
            }
        } else if let Some(path) = arg.strip_prefix("--job=") {
            path.to_string()
        } else {
            out.push(arg);
            continue;
        };
        let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidArgument {
            what: "job file",
            detail: format!("{}: {}", path, e),
        })?;
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            out.extend(line.split_ascii_whitespace().map(str::to_string));
        }
    }
    Ok(out)
}

/// `NAME[:N[:OPS]]`, count defaulting to one instance.
fn parse_stressor_spec(spec: &str) -> Result<ExplicitEntry> {
    let mut parts = spec.splitn(3, ':');
    let name = parts.next().unwrap_or("").to_string();
    if name.is_empty() {
        return Err(Error::InvalidArgument {
            what: "stressor spec",
            detail: format!("{:?}: empty name", spec),
        });
    }
    let instances = match parts.next() {
        None => 1,
        Some(n) => n.parse().map_err(|_| Error::InvalidArgument {
            what: "stressor spec",
            detail: format!("{:?}: bad instance count", spec),
        })?,
    };
    let ops = match parts.next() {
        None => 0,
        Some(n) => n.parse().map_err(|_| Error::InvalidArgument {
            what: "stressor spec",
            detail: format!("{:?}: bad ops budget", spec),
        })?,
    };
    Ok(ExplicitEntry {
        name,
        instances,
        ops,
    })
}

fn pick_mode(cli: &Cli) -> Result<Mode> {
    let modes: [(&'static str, bool); 4] = [
        ("all", cli.all.is_some()),
        ("sequential", cli.sequential.is_some()),
        ("permute", cli.permute.is_some()),
        ("random", cli.random.is_some()),
    ];
    let picked: Vec<&'static str> = modes
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    if picked.len() > 1 {
        return Err(Error::ConflictingModes(picked[0], picked[1]));
    }
    Ok(match () {
        _ if cli.all.is_some() => Mode::Parallel(cli.all.unwrap()),
        _ if cli.sequential.is_some() => Mode::Sequential(cli.sequential.unwrap()),
        _ if cli.permute.is_some() => Mode::Permute(cli.permute.unwrap()),
        _ if cli.random.is_some() => Mode::Random(cli.random.unwrap()),
        _ => Mode::ExplicitOnly,
    })
}

/// Resolves `--class` values; `NAME?` prints the members and asks the
/// caller to exit successfully.
fn resolve_classes(registry: &Registry, values: &[String]) -> Result<Option<Option<Class>>> {
    let mut filter: Option<Class> = None;
    for value in values {
        if let Some(name) = value.strip_suffix('?') {
            let class = Class::parse(name).ok_or_else(|| Error::UnknownClass {
                name: name.to_string(),
                valid: Class::valid_names(),
            })?;
            println!(
                "class '{}' stressors: {}",
                name,
                registry.class_members(class).join(" ")
            );
            return Ok(None);
        }
        let class = Class::parse(value).ok_or_else(|| Error::UnknownClass {
            name: value.to_string(),
            valid: Class::valid_names(),
        })?;
        filter = Some(filter.map_or(class, |f| f.union(class)));
    }
    Ok(Some(filter))
}

/// Routes `--set OPT=VALUE` pairs to the owning stressor's setter.
fn apply_opt_setters(registry: &Registry, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let (opt, value) = pair.split_once('=').ok_or_else(|| Error::InvalidArgument {
            what: "--set",
            detail: format!("{:?}: expected OPT=VALUE", pair),
        })?;
        let setter = registry
            .entries()
            .iter()
            .flat_map(|d| d.opt_setters)
            .find(|s| s.opt == opt);
        match setter {
            Some(setter) => (setter.set)(value).map_err(|e| Error::InvalidArgument {
                what: "--set",
                detail: format!("{}: {}", opt, e),
            })?,
            None => {
                let known: Vec<&str> = registry
                    .entries()
                    .iter()
                    .flat_map(|d| d.opt_setters)
                    .map(|s| s.opt)
                    .collect();
                return Err(Error::InvalidArgument {
                    what: "--set",
                    detail: format!("unknown option {:?}, known: {}", opt, known.join(" ")),
                });
            }
        }
    }
    Ok(())
}

fn run_fleet(
    registry: &Registry,
    plan: &mut RunList,
    shared: &SharedPlane,
    settings: &Settings,
    mode: Mode,
) -> Result<FleetOutcome> {
    let fleet = Fleet::new(registry, plan, shared, settings);
    match mode {
        Mode::Sequential(_) => fleet.run_sequential(),
        Mode::Permute(_) => fleet.run_permute(),
        Mode::ExplicitOnly | Mode::Parallel(_) | Mode::Random(_) => fleet.run_parallel(),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let registry = Registry::builtin();

    if cli.stressors {
        for desc in registry.entries() {
            let short = desc.short_opt.map(|c| format!("-{}", c)).unwrap_or_default();
            println!("{:<8} {:>2}  {}", desc.name, short, desc.help);
        }
        return Ok(ExitCode::Success);
    }

    let class_filter = match resolve_classes(&registry, &cli.class)? {
        Some(filter) => filter,
        // A `NAME?` listing was printed; nothing to run.
        None => return Ok(ExitCode::Success),
    };

    let mode = pick_mode(&cli)?;
    apply_opt_setters(&registry, &cli.set)?;
    let seed = match (cli.seed, cli.no_rand_seed) {
        (Some(seed), _) => seed,
        (None, true) => 0,
        (None, false) => rand::random(),
    };

    let explicit = cli
        .stressor
        .iter()
        .map(|s| parse_stressor_spec(s))
        .collect::<Result<Vec<_>>>()?;
    if explicit.is_empty() && mode == Mode::ExplicitOnly {
        return Err(Error::InvalidArgument {
            what: "selection",
            detail: "no stressors selected; try --all 1, --random 4 or --stressor cpu:2".into(),
        });
    }

    let input = PlanInput {
        explicit,
        class_filter,
        mode,
        with: cli.with.clone(),
        exclude: cli.exclude.clone(),
        allow_pathological: cli.pathological,
        default_ops: cli.ops,
        seed,
    };
    let mut plan = plan::build(&registry, &input)?;

    if plan.runnable_count() == 0 {
        if plan.idled_by_unsupported_only() {
            info!("nothing to run: every selected stressor is unsupported here");
            return Ok(ExitCode::Success);
        }
        return Err(Error::EmptyPlan);
    }

    let settings = Settings {
        timeout_secs: cli.timeout,
        backoff_us: cli.backoff,
        abort: cli.abort,
        aggressive: cli.aggressive,
        verify: cli.verify,
        metrics: cli.metrics,
        metrics_brief: cli.metrics_brief,
        keep_name: cli.keep_name,
        keep_files: cli.keep_files,
        seed,
        yaml: cli.yaml.clone(),
        temp_dir: cli.temp_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
    };

    info!(
        "running {} stressor entries, {} instances total (seed {})",
        plan.runnable_count(),
        plan.total_instances(),
        seed
    );

    adapters::oom_avoid_self();
    adapters::clocksource_log();
    adapters::cpuidle_log();
    adapters::smart_log();
    adapters::vmstat_log("pre-run");
    adapters::thrash_start();
    let ksm_previous = if settings.aggressive {
        adapters::ksm_enable()
    } else {
        None
    };

    let shared = SharedPlane::new(plan.total_instances())?;
    shared.header().mem_cache = adapters::mem_cache_geometry();
    signal::publish(&shared);
    signal::install_parent()?;

    for entry in plan.entries.iter().filter(|e| e.runnable()) {
        let hooks = registry.entries()[entry.desc].hooks;
        if let Some(init) = hooks.init {
            init();
        }
        if let Some(set_default) = hooks.set_default {
            set_default();
        }
        if let Some(set_limit) = hooks.set_limit {
            set_limit(entry.num_instances as u64);
        }
    }

    let outcome = run_fleet(&registry, &mut plan, &shared, &settings, mode)?;

    for entry in plan.entries.iter().filter(|e| e.runnable()) {
        if let Some(deinit) = registry.entries()[entry.desc].hooks.deinit {
            deinit();
        }
    }
    adapters::ftrace_stop();
    adapters::thrash_stop();
    adapters::ksm_restore(ksm_previous);
    adapters::vmstat_log("post-run");

    let mut exit = outcome.exit;
    if !metrics::verify_integrity(&mut plan, &shared) {
        exit = exit.merge(ExitCode::MetricsUntrustworthy);
    }
    metrics::counters_suspicious(&plan, &shared);
    if !outcome.metrics_success {
        exit = exit.merge(ExitCode::MetricsUntrustworthy);
    }
    if !outcome.resource_success {
        exit = exit.merge(ExitCode::NoResource);
    }
    if !outcome.success {
        exit = exit.merge(ExitCode::Failure);
    }

    let header = shared.header_atomics();
    let started = header.started.load(std::sync::atomic::Ordering::Relaxed);
    let reaped = header.reaped.load(std::sync::atomic::Ordering::Relaxed);
    if started != reaped {
        warn!("{} instances started but only {} reaped", started, reaped);
    }
    debug!(
        "instances: {} started, {} exited, {} reaped, {} failed, {} alarmed",
        started,
        header.exited.load(std::sync::atomic::Ordering::Relaxed),
        reaped,
        header.failed.load(std::sync::atomic::Ordering::Relaxed),
        header.alarmed.load(std::sync::atomic::Ordering::Relaxed)
    );

    let reports = metrics::aggregate(&plan, &shared);
    if settings.metrics || settings.metrics_brief {
        report::log_metrics(&reports, settings.metrics_brief);
    }
    metrics::summarize_statuses(&plan);

    let run_time = if header.time_started > 0.0 {
        brunt::now() - header.time_started
    } else {
        0.0
    };
    let (user_time, system_time) = children_times();
    report::log_times(run_time, user_time, system_time);

    if let Some(path) = &settings.yaml {
        report::emit_yaml(path, seed, &reports, run_time, user_time, system_time)?;
        info!("metrics written to {}", path.display());
    }

    if signal::caught_sigint() {
        warn!("run interrupted, results cover the completed portion only");
    }
    let alarm_pid = header.alarm_pid.load(std::sync::atomic::Ordering::Relaxed);
    if alarm_pid != 0 {
        info!(
            "alarm signal was sent by pid {} (uid {}) at t={:.2}",
            alarm_pid,
            header.alarm_uid.load(std::sync::atomic::Ordering::Relaxed),
            header.alarm_time()
        );
    }

    signal::uninstall();
    Ok(exit)
}

fn children_times() -> (f64, f64) {
    let mut usage = unsafe { std::mem::zeroed::<libc::rusage>() };
    if unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) } == 0 {
        let secs = |tv: &libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6;
        (secs(&usage.ru_utime), secs(&usage.ru_stime))
    } else {
        (0.0, 0.0)
    }
}

fn main() {
    let args = match expand_job_args(std::env::args().collect()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("brunt: {}", e);
            std::process::exit(ExitCode::Failure as i32);
        }
    };
    let cli = Cli::parse_from(args);

    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            log::error!("{}", ErrorChain(&e));
            std::process::exit(ExitCode::Failure as i32);
        }
    }
}

/// Renders the error with its source chain on one line.
struct ErrorChain<'a>(&'a Error);

impl std::fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::error::Error as _;
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}
